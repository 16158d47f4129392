use std::net::Ipv4Addr;
use std::time::Duration;

use crate::util::checksum;
use crate::util::ByteCursor;

use super::code::IgmpCode;
use super::IgmpError;
use super::IGMP_MEMBERSHIP_QUERY;

/// Length of a v1/v2 query (and of every legacy message).
pub const LEGACY_MESSAGE_LEN: usize = 8;

/// Fixed part of an IGMPv3 query, up to and including the source count.
pub const V3_QUERY_HEADER_LEN: usize = 12;

/// Sources that fit a 1500 byte MTU behind a 24 byte IPv4 header (router alert).
pub const MAX_QUERY_SOURCES: usize = (1500 - 24 - V3_QUERY_HEADER_LEN) / 4;

pub const FLAG_SUPPRESS_ROUTER_PROCESSING: u8 = 0x08;
pub const QRV_MASK: u8 = 0x07;

/// IGMPv1 / IGMPv2 query. Only the group is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyQuery {
    pub group_address: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryV3 {
    pub max_response_code: IgmpCode,
    pub group_address: Ipv4Addr,
    /// Raw flags byte: reserved nibble, S flag, QRV.
    pub flags: u8,
    pub query_interval_code: IgmpCode,
    pub source_addresses: Vec<Ipv4Addr>,
}

impl QueryV3 {
    pub fn general(max_response_code: IgmpCode, flags: u8, query_interval_code: IgmpCode) -> Self {
        Self {
            max_response_code,
            group_address: Ipv4Addr::UNSPECIFIED,
            flags,
            query_interval_code,
            source_addresses: Vec::new(),
        }
    }

    pub fn is_general(&self) -> bool {
        self.group_address.is_unspecified()
    }

    pub fn suppress_router_processing(&self) -> bool {
        self.flags & FLAG_SUPPRESS_ROUTER_PROCESSING != 0
    }

    /// Querier's robustness variable.
    pub fn robustness(&self) -> u8 {
        self.flags & QRV_MASK
    }

    /// Max Resp Code is in units of 1/10 second.
    pub fn max_response_time(&self) -> Duration {
        Duration::from_millis(self.max_response_code.value() as u64 * 100)
    }

    pub fn query_interval(&self) -> Duration {
        Duration::from_secs(self.query_interval_code.value() as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipQuery {
    Legacy(LegacyQuery),
    V3(QueryV3),
}

impl MembershipQuery {
    pub fn group_address(&self) -> Ipv4Addr {
        match self {
            MembershipQuery::Legacy(query) => query.group_address,
            MembershipQuery::V3(query) => query.group_address,
        }
    }
}

/// Decodes a v1/v2 query. The cursor sits right after the type byte.
pub fn decode_legacy(cursor: &mut ByteCursor) -> Result<LegacyQuery, IgmpError> {
    cursor.ensure(LEGACY_MESSAGE_LEN - 1)?;
    // max resp time, checksum
    cursor.advance(3)?;
    let group_address = cursor.read_addr()?;
    Ok(LegacyQuery { group_address })
}

/// Decodes an IGMPv3 query. The cursor sits right after the type byte.
///
/// Fails with `DeclaredLengthExceedsBuffer` unless every announced source is present.
pub fn decode_v3(cursor: &mut ByteCursor) -> Result<QueryV3, IgmpError> {
    let max_response_code = IgmpCode::new(cursor.read_u8()?);
    let _checksum = cursor.read_u16()?;
    let group_address = cursor.read_addr()?;
    let flags = cursor.read_u8()?;
    let query_interval_code = IgmpCode::new(cursor.read_u8()?);
    let nsrc = cursor.read_u16()? as usize;

    let source_addresses = cursor.read_addrs(nsrc)
        .map_err(|e| IgmpError::declared("query source list", e))?;

    Ok(QueryV3 {
        max_response_code,
        group_address,
        flags,
        query_interval_code,
        source_addresses,
    })
}

pub fn encode_v3(query: &QueryV3) -> Result<Vec<u8>, IgmpError> {
    let nsrc = query.source_addresses.len();
    if nsrc > MAX_QUERY_SOURCES {
        return Err(IgmpError::TooManySources(nsrc));
    }

    let mut data = Vec::with_capacity(V3_QUERY_HEADER_LEN + 4 * nsrc);
    data.push(IGMP_MEMBERSHIP_QUERY);
    data.push(query.max_response_code.raw());
    data.extend_from_slice(&[0, 0]);
    data.extend_from_slice(&query.group_address.octets());
    data.push(query.flags);
    data.push(query.query_interval_code.raw());
    data.extend_from_slice(&(nsrc as u16).to_be_bytes());
    for source in &query.source_addresses {
        data.extend_from_slice(&source.octets());
    }

    checksum::stamp(&mut data, 2);
    Ok(data)
}

/// Builds the General Query sent to probe a link: group 0.0.0.0, no sources,
/// checksum filled in.
pub fn build_general_query(mrc: u8, flags: u8, qqic: u8) -> Vec<u8> {
    let mut data = vec![0u8; V3_QUERY_HEADER_LEN];
    data[0] = IGMP_MEMBERSHIP_QUERY;
    data[1] = mrc;
    data[8] = flags;
    data[9] = qqic;
    checksum::stamp(&mut data, 2);
    data
}

impl std::fmt::Display for LegacyQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "IGMPv1 or IGMPv2 Query: group {}", self.group_address)
    }
}

impl std::fmt::Display for QueryV3 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "IGMPv3 Query mrc:{} ({}ms) group:{} flags:0x{:02x} qqic:{} ({}s) nsrc:{}",
            self.max_response_code.raw(),
            self.max_response_time().as_millis(),
            self.group_address,
            self.flags,
            self.query_interval_code.raw(),
            self.query_interval().as_secs(),
            self.source_addresses.len(),
        )?;
        for source in &self.source_addresses {
            write!(f, "\n  source {}", source)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for MembershipQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MembershipQuery::Legacy(query) => query.fmt(f),
            MembershipQuery::V3(query) => query.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn general_query_checksum() {
        let data = build_general_query(100, 2, 125);
        assert_eq!(data, hex!("11 64 ec 1e 00 00 00 00 02 7d 00 00"));
        assert_eq!(checksum::compute(&data), 0x0000);
    }

    #[test]
    fn general_query_matches_encoder() {
        let query = QueryV3::general(IgmpCode::new(100), 2, IgmpCode::new(125));
        assert_eq!(encode_v3(&query).unwrap(), build_general_query(100, 2, 125));
    }

    #[test]
    fn decodes_group_and_source_specific_query() {
        let data = hex!("11 8a 00 00 e8 01 02 03 0a 90 00 02 c0 00 02 01 c0 00 02 02");
        let mut cursor = ByteCursor::new(&data[1..]);
        let query = decode_v3(&mut cursor).unwrap();

        assert_eq!(query.max_response_code.raw(), 0x8a);
        assert_eq!(query.max_response_time(), Duration::from_millis(208 * 100));
        assert_eq!(query.group_address, Ipv4Addr::new(232, 1, 2, 3));
        assert!(query.suppress_router_processing());
        assert_eq!(query.robustness(), 2);
        assert_eq!(query.query_interval(), Duration::from_secs(256));
        assert_eq!(query.source_addresses, vec![Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(192, 0, 2, 2)]);
        assert!(!query.is_general());
        assert!(cursor.is_empty());
    }

    #[test]
    fn truncated_source_list_is_rejected() {
        // three sources announced, two and a half present
        let data = hex!("11 64 00 00 00 00 00 00 02 7d 00 03 0a 00 00 01 0a 00 00 02 0a 00");
        let mut cursor = ByteCursor::new(&data[1..]);
        assert_eq!(
            decode_v3(&mut cursor),
            Err(IgmpError::DeclaredLengthExceedsBuffer { field: "query source list", declared: 12, remaining: 10 }),
        );
    }

    #[test]
    fn legacy_query_reads_group_only() {
        let data = hex!("11 64 ee 9b ef 01 01 01");
        let mut cursor = ByteCursor::new(&data[1..]);
        let query = decode_legacy(&mut cursor).unwrap();
        assert_eq!(query.group_address, Ipv4Addr::new(239, 1, 1, 1));
    }

    #[test]
    fn too_many_sources() {
        let mut query = QueryV3::general(IgmpCode::new(100), 2, IgmpCode::new(125));
        query.source_addresses = vec![Ipv4Addr::new(10, 0, 0, 1); MAX_QUERY_SOURCES + 1];
        assert_eq!(encode_v3(&query), Err(IgmpError::TooManySources(MAX_QUERY_SOURCES + 1)));

        query.source_addresses.pop();
        assert_eq!(encode_v3(&query).unwrap().len(), V3_QUERY_HEADER_LEN + 4 * MAX_QUERY_SOURCES);
    }

    #[test]
    fn display_lists_sources() {
        let mut query = QueryV3::general(IgmpCode::new(100), 2, IgmpCode::new(125));
        query.source_addresses.push(Ipv4Addr::new(192, 0, 2, 7));
        assert_eq!(
            query.to_string(),
            "IGMPv3 Query mrc:100 (10000ms) group:0.0.0.0 flags:0x02 qqic:125 (125s) nsrc:1\n  source 192.0.2.7",
        );
    }
}
