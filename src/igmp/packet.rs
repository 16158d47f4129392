use std::fmt::Debug;
use std::net::Ipv4Addr;

use super::IgmpError;

/// Largest IPv4 datagram we can receive.
pub const MAX_DATAGRAM_LEN: usize = 65536;

const MIN_IPV4_HEADER_LEN: usize = 20;

pub struct Packet {
    /// destination address for sending, or source address for receiving
    pub target_addr: Ipv4Addr,

    /// packet data: the whole IPv4 datagram when received, the IGMP message alone
    /// when sent (the kernel adds the IP header)
    pub data: Box<[u8]>,

    /// length of packet data
    pub data_len: usize,
}

impl Packet {
    pub fn new() -> Self {
        Self {
            target_addr: Ipv4Addr::UNSPECIFIED,
            data: vec![0u8; MAX_DATAGRAM_LEN].into_boxed_slice(),
            data_len: 0,
        }
    }

    pub fn data(&self) -> &[u8] {
        let len = self.data_len;
        if len > self.data.len() {
            &self.data
        } else {
            &self.data[..len]
        }
    }

    pub fn set_data(&mut self, data: &[u8]) -> Result<(), IgmpError> {
        if data.len() > self.data.len() {
            return Err(IgmpError::PacketTooLong(data.len()));
        }
        self.data[..data.len()].copy_from_slice(data);
        self.data_len = data.len();
        Ok(())
    }

    /// IP header length from the IHL field, in bytes.
    pub fn ip_header_len(&self) -> Result<usize, IgmpError> {
        let data = self.data();
        let first = *data.first().ok_or(IgmpError::InvalidIpHeader("empty datagram"))?;
        if first >> 4 != 4 {
            return Err(IgmpError::InvalidIpHeader("not an IPv4 datagram"));
        }

        let header_len = (first & 0x0f) as usize * 4;
        if header_len < MIN_IPV4_HEADER_LEN {
            return Err(IgmpError::InvalidIpHeader("header length below minimum"));
        }
        if header_len > data.len() {
            return Err(IgmpError::InvalidIpHeader("header length exceeds datagram"));
        }
        Ok(header_len)
    }

    /// The IGMP message carried by a received datagram.
    pub fn payload(&self) -> Result<&[u8], IgmpError> {
        let header_len = self.ip_header_len()?;
        Ok(&self.data()[header_len..])
    }

    pub fn source_addr(&self) -> Option<Ipv4Addr> {
        self.header_addr(12)
    }

    pub fn destination_addr(&self) -> Option<Ipv4Addr> {
        self.header_addr(16)
    }

    fn header_addr(&self, offset: usize) -> Option<Ipv4Addr> {
        let octets: [u8; 4] = self.data().get(offset..(offset + 4))?.try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("target_addr", &self.target_addr)
            .field("data_len", &self.data_len)
            .finish()
    }
}
