pub mod code;
pub mod packet;
pub mod query;
pub mod report;
pub mod socket;

pub use code::IgmpCode;
pub use query::{LegacyQuery, MembershipQuery, QueryV3};
pub use report::{GroupRecord, LegacyReport, MembershipReport, RecordType};
pub use socket::{AsyncIgmpSocket, MembershipSocket, MulticastMembership, RawIgmpSocket};

use crate::util::checksum;
use crate::util::ByteCursor;
use crate::util::Underrun;

use std::net::Ipv4Addr;

pub const IGMP_MEMBERSHIP_QUERY: u8 = 0x11;
pub const IGMP_V1_MEMBERSHIP_REPORT: u8 = 0x12;
pub const IGMP_V2_MEMBERSHIP_REPORT: u8 = 0x16;
pub const IGMP_V3_MEMBERSHIP_REPORT: u8 = 0x22;

/// 224.0.0.22, all IGMPv3-capable routers
pub const ALL_IGMPV3_ROUTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 22);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgmpError {
    /// A fixed-size field ran past the end of the buffer.
    BufferUnderrun { needed: usize, remaining: usize },

    /// A count-prefixed region announced more bytes than the buffer holds.
    DeclaredLengthExceedsBuffer { field: &'static str, declared: usize, remaining: usize },

    UnknownMessageType(u8),

    /// `received` is the checksum field, `computed` what it should have been.
    ChecksumMismatch { received: u16, computed: u16 },

    InvalidIpHeader(&'static str),

    TooManySources(usize),

    /// Auxiliary data length in bytes; must be a multiple of 4, at most 255 words.
    InvalidAuxData(usize),

    PacketTooLong(usize),

    UnsupportedMessage(&'static str),
}

impl IgmpError {
    pub(crate) fn declared(field: &'static str, underrun: Underrun) -> Self {
        IgmpError::DeclaredLengthExceedsBuffer {
            field,
            declared: underrun.needed,
            remaining: underrun.remaining,
        }
    }
}

impl From<Underrun> for IgmpError {
    fn from(underrun: Underrun) -> Self {
        IgmpError::BufferUnderrun {
            needed: underrun.needed,
            remaining: underrun.remaining,
        }
    }
}

impl std::fmt::Display for IgmpError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            IgmpError::BufferUnderrun { needed, remaining } => {
                write!(f, "IGMP message too short: needed {} bytes, {} remaining", needed, remaining)
            }
            IgmpError::DeclaredLengthExceedsBuffer { field, declared, remaining } => {
                write!(f, "IGMP {} declares {} bytes, only {} remaining", field, declared, remaining)
            }
            IgmpError::UnknownMessageType(igmp_type) => {
                write!(f, "unknown IGMP message type {:#04x}", igmp_type)
            }
            IgmpError::ChecksumMismatch { received, computed } => {
                write!(f, "IGMP checksum mismatch: received {:#06x}, computed {:#06x}", received, computed)
            }
            IgmpError::InvalidIpHeader(message) => {
                write!(f, "invalid IPv4 header: {}", message)
            }
            IgmpError::TooManySources(count) => {
                write!(f, "too many source addresses: {}", count)
            }
            IgmpError::InvalidAuxData(len) => {
                write!(f, "invalid auxiliary data length: {} bytes", len)
            }
            IgmpError::PacketTooLong(len) => {
                write!(f, "IGMP packet too long: {} bytes", len)
            }
            IgmpError::UnsupportedMessage(message) => {
                write!(f, "unsupported IGMP message: {}", message)
            }
        }
    }
}

impl std::error::Error for IgmpError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgmpPacket {
    /// type 0x11
    MembershipQuery(MembershipQuery),

    /// type 0x12
    V1MembershipReport(LegacyReport),

    /// type 0x16
    V2MembershipReport(LegacyReport),

    /// type 0x22
    V3MembershipReport(MembershipReport),
}

impl IgmpPacket {
    pub fn igmp_type(&self) -> u8 {
        match self {
            IgmpPacket::MembershipQuery(_) => IGMP_MEMBERSHIP_QUERY,
            IgmpPacket::V1MembershipReport(_) => IGMP_V1_MEMBERSHIP_REPORT,
            IgmpPacket::V2MembershipReport(_) => IGMP_V2_MEMBERSHIP_REPORT,
            IgmpPacket::V3MembershipReport(_) => IGMP_V3_MEMBERSHIP_REPORT,
        }
    }
}

impl std::fmt::Display for IgmpPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            IgmpPacket::MembershipQuery(query) => query.fmt(f),
            IgmpPacket::V1MembershipReport(report) => {
                write!(f, "IGMPv1 Report code:{} group:{}", report.response_code, report.group_address)
            }
            IgmpPacket::V2MembershipReport(report) => {
                write!(f, "IGMPv2 Report code:{} group:{}", report.response_code, report.group_address)
            }
            IgmpPacket::V3MembershipReport(report) => report.fmt(f),
        }
    }
}

/// Decodes one IGMP message (the payload after the IP header).
///
/// A query long enough for the IGMPv3 header is decoded as v3, anything shorter as
/// a v1/v2 query. The buffer is only borrowed for the duration of the call.
pub fn decode(payload: &[u8]) -> Result<IgmpPacket, IgmpError> {
    let mut cursor = ByteCursor::new(payload);
    let igmp_type = cursor.read_u8()?;

    match igmp_type {
        IGMP_MEMBERSHIP_QUERY => {
            let query = if payload.len() >= query::V3_QUERY_HEADER_LEN {
                MembershipQuery::V3(query::decode_v3(&mut cursor)?)
            } else {
                MembershipQuery::Legacy(query::decode_legacy(&mut cursor)?)
            };
            Ok(IgmpPacket::MembershipQuery(query))
        }

        IGMP_V1_MEMBERSHIP_REPORT => {
            Ok(IgmpPacket::V1MembershipReport(report::decode_legacy(&mut cursor)?))
        }

        IGMP_V2_MEMBERSHIP_REPORT => {
            Ok(IgmpPacket::V2MembershipReport(report::decode_legacy(&mut cursor)?))
        }

        IGMP_V3_MEMBERSHIP_REPORT => {
            Ok(IgmpPacket::V3MembershipReport(report::decode(&mut cursor)?))
        }

        _ => Err(IgmpError::UnknownMessageType(igmp_type)),
    }
}

/// Checks the checksum carried in an IGMP message against its contents.
pub fn verify_checksum(payload: &[u8]) -> Result<(), IgmpError> {
    let mut cursor = ByteCursor::new(payload);
    cursor.advance(2)?;
    let received = cursor.read_u16()?;

    if checksum::verify(payload) {
        return Ok(());
    }

    let mut copy = payload.to_vec();
    checksum::stamp(&mut copy, 2);
    let computed = u16::from_be_bytes([copy[2], copy[3]]);
    Err(IgmpError::ChecksumMismatch { received, computed })
}

pub fn encode(packet: &IgmpPacket) -> Result<Vec<u8>, IgmpError> {
    match packet {
        IgmpPacket::MembershipQuery(MembershipQuery::V3(query)) => query::encode_v3(query),
        IgmpPacket::MembershipQuery(MembershipQuery::Legacy(_)) => {
            Err(IgmpError::UnsupportedMessage("IGMPv1/v2 query"))
        }
        IgmpPacket::V1MembershipReport(report) => Ok(report::encode_legacy(IGMP_V1_MEMBERSHIP_REPORT, report)),
        IgmpPacket::V2MembershipReport(report) => Ok(report::encode_legacy(IGMP_V2_MEMBERSHIP_REPORT, report)),
        IgmpPacket::V3MembershipReport(report) => report::encode(report),
    }
}

/// Decodes datagrams received on a raw IGMP socket.
pub struct IgmpParser {
    pub(crate) packet: packet::Packet,
}

impl IgmpParser {
    pub fn new() -> Self {
        Self {
            packet: packet::Packet::new(),
        }
    }

    pub fn new_from_packet(packet: packet::Packet) -> Self {
        Self {
            packet,
        }
    }

    pub fn packet(&self) -> &packet::Packet {
        &self.packet
    }

    pub fn parse(&self) -> Result<IgmpPacket, IgmpError> {
        decode(self.packet.payload()?)
    }

    pub fn verify_checksum(&self) -> Result<(), IgmpError> {
        verify_checksum(self.packet.payload()?)
    }
}

impl Default for IgmpParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct IgmpWriter {
    pub(crate) packet: packet::Packet,
}

impl IgmpWriter {
    pub fn new() -> Self {
        let mut packet = packet::Packet::new();
        packet.target_addr = ALL_IGMPV3_ROUTERS;
        Self {
            packet,
        }
    }

    pub fn set_destination(&mut self, addr: Ipv4Addr) {
        self.packet.target_addr = addr;
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.packet.target_addr
    }

    pub fn data(&self) -> &[u8] {
        self.packet.data()
    }

    pub fn set_packet(&mut self, packet: &IgmpPacket) -> Result<(), IgmpError> {
        let data = encode(packet)?;
        self.packet.set_data(&data)
    }

    /// Loads an already encoded message, e.g. from [`query::build_general_query`].
    pub fn set_raw(&mut self, data: &[u8]) -> Result<(), IgmpError> {
        self.packet.set_data(data)
    }
}

impl Default for IgmpWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn dispatches_by_type_and_length() {
        let v3 = decode(&hex!("11 64 ec 1e 00 00 00 00 02 7d 00 00")).unwrap();
        assert!(matches!(v3, IgmpPacket::MembershipQuery(MembershipQuery::V3(_))));

        let legacy = decode(&hex!("11 64 ee 9b ef 01 01 01")).unwrap();
        assert_eq!(
            legacy,
            IgmpPacket::MembershipQuery(MembershipQuery::Legacy(LegacyQuery { group_address: Ipv4Addr::new(239, 1, 1, 1) })),
        );

        let v2 = decode(&hex!("16 00 f9 fc ef 01 01 01")).unwrap();
        assert_eq!(
            v2,
            IgmpPacket::V2MembershipReport(LegacyReport { response_code: 0, group_address: Ipv4Addr::new(239, 1, 1, 1) }),
        );
        assert_eq!(v2.to_string(), "IGMPv2 Report code:0 group:239.1.1.1");

        let v1 = decode(&hex!("12 00 00 00 e0 00 00 fb")).unwrap();
        assert_eq!(v1.igmp_type(), IGMP_V1_MEMBERSHIP_REPORT);
    }

    #[test]
    fn unknown_and_empty() {
        assert_eq!(decode(&[0x00, 0, 0, 0, 0, 0, 0, 0]), Err(IgmpError::UnknownMessageType(0x00)));
        assert_eq!(decode(&[0x17, 0, 0, 0, 224, 0, 0, 2]), Err(IgmpError::UnknownMessageType(0x17)));
        assert_eq!(decode(&[]), Err(IgmpError::BufferUnderrun { needed: 1, remaining: 0 }));
    }

    #[test]
    fn short_legacy_messages() {
        assert_eq!(decode(&[0x11, 0x64, 0x00, 0x00, 0xef]), Err(IgmpError::BufferUnderrun { needed: 7, remaining: 4 }));
        assert_eq!(decode(&[0x16, 0x00]), Err(IgmpError::BufferUnderrun { needed: 2, remaining: 0 }));
    }

    #[test]
    fn checksum_verification_is_explicit() {
        let good = hex!("11 64 ec 1e 00 00 00 00 02 7d 00 00");
        assert_eq!(verify_checksum(&good), Ok(()));

        let mut bad = good;
        bad[3] = 0x1f;
        assert_eq!(verify_checksum(&bad), Err(IgmpError::ChecksumMismatch { received: 0xec1f, computed: 0xec1e }));
        // decoding does not look at the checksum
        assert_eq!(decode(&bad), decode(&good));

        assert_eq!(verify_checksum(&[0x11, 0x64, 0xec]), Err(IgmpError::BufferUnderrun { needed: 2, remaining: 1 }));
    }

    #[test]
    fn writer_encodes_and_stamps() {
        let mut writer = IgmpWriter::new();
        assert_eq!(writer.destination(), ALL_IGMPV3_ROUTERS);

        let report = IgmpPacket::V3MembershipReport(MembershipReport {
            records: vec![GroupRecord::new(RecordType::IsExclude, Ipv4Addr::new(239, 255, 255, 250), vec![])],
        });
        writer.set_packet(&report).unwrap();
        assert_eq!(writer.data().len(), 16);
        assert_eq!(verify_checksum(writer.data()), Ok(()));
        assert_eq!(decode(writer.data()), Ok(report));

        let legacy = IgmpPacket::MembershipQuery(MembershipQuery::Legacy(LegacyQuery { group_address: Ipv4Addr::UNSPECIFIED }));
        assert_eq!(writer.set_packet(&legacy), Err(IgmpError::UnsupportedMessage("IGMPv1/v2 query")));
    }

    #[test]
    fn parser_strips_ip_header() {
        let mut packet = packet::Packet::new();
        packet.set_data(&hex!(
            "46 c0 00 28 00 00 40 00 01 02 00 00 c0 a8 01 0a e0 00 00 16 94 04 00 00"
            "16 00 f9 fc ef 01 01 01"
        )).unwrap();
        let parser = IgmpParser::new_from_packet(packet);
        assert_eq!(parser.verify_checksum(), Ok(()));
        assert!(matches!(parser.parse(), Ok(IgmpPacket::V2MembershipReport(_))));
    }
}
