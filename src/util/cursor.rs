use std::net::Ipv4Addr;

/// A read that asked for more bytes than the cursor had left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Underrun {
    pub needed: usize,
    pub remaining: usize,
}

impl std::fmt::Display for Underrun {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "needed {} bytes, {} remaining", self.needed, self.remaining)
    }
}

impl std::error::Error for Underrun {}

/// Bounded sequential reader over a borrowed byte buffer.
///
/// Every read checks the remaining length on its own. After a failed read the
/// caller must stop decoding; the position is not meaningful anymore.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails unless at least `n` more bytes are available. Does not move the cursor.
    pub fn ensure(&self, n: usize) -> Result<(), Underrun> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(Underrun { needed: n, remaining });
        }
        Ok(())
    }

    pub fn take_slice(&mut self, n: usize) -> Result<&'a [u8], Underrun> {
        self.ensure(n)?;
        let slice = &self.buf[self.offset..(self.offset + n)];
        self.offset += n;
        Ok(slice)
    }

    pub fn advance(&mut self, n: usize) -> Result<(), Underrun> {
        self.take_slice(n).map(|_| ())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Underrun> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take_slice(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, Underrun> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16, Underrun> {
        self.read_array().map(u16::from_be_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, Underrun> {
        self.read_array().map(u32::from_be_bytes)
    }

    pub fn read_addr(&mut self) -> Result<Ipv4Addr, Underrun> {
        self.read_array::<4>().map(Ipv4Addr::from)
    }

    /// Reads `count` consecutive IPv4 addresses. The whole list is checked up front,
    /// so either all of them are returned or nothing is consumed.
    pub fn read_addrs(&mut self, count: usize) -> Result<Vec<Ipv4Addr>, Underrun> {
        let bytes = self.take_slice(count.saturating_mul(4))?;
        Ok(bytes.chunks_exact(4).map(|a| Ipv4Addr::new(a[0], a[1], a[2], a[3])).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_network_order() {
        let data = [0x11, 0x01, 0x02, 0xde, 0xad, 0xbe, 0xef, 0xe0, 0x00, 0x00, 0x16];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_u8(), Ok(0x11));
        assert_eq!(cursor.read_u16(), Ok(0x0102));
        assert_eq!(cursor.read_u32(), Ok(0xdeadbeef));
        assert_eq!(cursor.read_addr(), Ok(Ipv4Addr::new(224, 0, 0, 22)));
        assert!(cursor.is_empty());
        assert_eq!(cursor.offset(), data.len());
    }

    #[test]
    fn every_read_is_bounded() {
        let data = [0x01, 0x02, 0x03];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_u32(), Err(Underrun { needed: 4, remaining: 3 }));
        assert_eq!(cursor.read_addr(), Err(Underrun { needed: 4, remaining: 3 }));
        assert_eq!(cursor.read_u16(), Ok(0x0102));
        assert_eq!(cursor.read_u16(), Err(Underrun { needed: 2, remaining: 1 }));
        assert_eq!(cursor.advance(2), Err(Underrun { needed: 2, remaining: 1 }));
        assert_eq!(cursor.take_slice(1), Ok(&[0x03][..]));
        assert_eq!(cursor.read_u8(), Err(Underrun { needed: 1, remaining: 0 }));
    }

    #[test]
    fn address_list_is_all_or_nothing() {
        let data = [10, 0, 0, 1, 10, 0, 0, 2, 10, 0];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_addrs(3), Err(Underrun { needed: 12, remaining: 10 }));
        assert_eq!(cursor.remaining(), 10);
        assert_eq!(cursor.read_addrs(2), Ok(vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]));
        assert_eq!(cursor.read_addrs(0), Ok(vec![]));
    }

    #[test]
    fn huge_counts_do_not_overflow() {
        let data = [0u8; 4];
        let mut cursor = ByteCursor::new(&data);
        assert!(cursor.read_addrs(usize::MAX).is_err());
        assert!(cursor.ensure(usize::MAX).is_err());
    }
}
