use std::net::Ipv4Addr;

use crate::util::checksum;
use crate::util::ByteCursor;

use super::query;
use super::IgmpError;
use super::IGMP_V3_MEMBERSHIP_REPORT;

pub const V3_REPORT_HEADER_LEN: usize = 8;
pub const GROUP_RECORD_HEADER_LEN: usize = 8;

/// Largest IGMP payload we emit: 1500 byte MTU behind a 24 byte IPv4 header.
pub const MAX_REPORT_LEN: usize = 1500 - 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// MODE_IS_INCLUDE
    IsInclude,

    /// MODE_IS_EXCLUDE
    IsExclude,

    /// CHANGE_TO_INCLUDE_MODE
    ToInclude,

    /// CHANGE_TO_EXCLUDE_MODE
    ToExclude,

    /// ALLOW_NEW_SOURCES
    AllowNewSources,

    /// BLOCK_OLD_SOURCES
    BlockOldSources,

    /// type byte outside 1..=6
    Unknown(u8),
}

const RECORD_TYPES: [(RecordType, u8, &str); 6] = [
    (RecordType::IsInclude, 1, "is_in"),
    (RecordType::IsExclude, 2, "is_ex"),
    (RecordType::ToInclude, 3, "to_in"),
    (RecordType::ToExclude, 4, "to_ex"),
    (RecordType::AllowNewSources, 5, "allow"),
    (RecordType::BlockOldSources, 6, "block"),
];

impl RecordType {
    /// Short name used when printing reports, `None` for unknown types.
    pub fn label(self) -> Option<&'static str> {
        RECORD_TYPES.iter()
            .find(|(record_type, _, _)| *record_type == self)
            .map(|(_, _, label)| *label)
    }

    pub fn is_current_state(self) -> bool {
        matches!(self, RecordType::IsInclude | RecordType::IsExclude)
    }

    pub fn is_filter_mode_change(self) -> bool {
        matches!(self, RecordType::ToInclude | RecordType::ToExclude)
    }

    pub fn is_source_list_change(self) -> bool {
        matches!(self, RecordType::AllowNewSources | RecordType::BlockOldSources)
    }
}

impl From<u8> for RecordType {
    fn from(value: u8) -> Self {
        RECORD_TYPES.iter()
            .find(|(_, code, _)| *code == value)
            .map(|(record_type, _, _)| *record_type)
            .unwrap_or(RecordType::Unknown(value))
    }
}

impl From<RecordType> for u8 {
    fn from(record_type: RecordType) -> Self {
        match record_type {
            RecordType::Unknown(value) => value,
            known => RECORD_TYPES.iter()
                .find(|(record_type, _, _)| *record_type == known)
                .map(|(_, code, _)| *code)
                .unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.label() {
            Some(label) => f.write_str(label),
            None => write!(f, "type({})", u8::from(*self)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub record_type: RecordType,
    /// Auxiliary data length in 32-bit words, as found on the wire. The encoder
    /// derives it from `aux_data` instead.
    pub aux_words: u8,
    pub multicast_address: Ipv4Addr,
    pub source_addresses: Vec<Ipv4Addr>,
    pub aux_data: Vec<u8>,
}

impl GroupRecord {
    pub fn new(record_type: RecordType, multicast_address: Ipv4Addr, source_addresses: Vec<Ipv4Addr>) -> Self {
        Self {
            record_type,
            aux_words: 0,
            multicast_address,
            source_addresses,
            aux_data: Vec::new(),
        }
    }

    fn encoded_len(&self) -> usize {
        GROUP_RECORD_HEADER_LEN + 4 * self.source_addresses.len() + self.aux_data.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MembershipReport {
    pub records: Vec<GroupRecord>,
}

/// IGMPv1 / IGMPv2 membership report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyReport {
    pub response_code: u8,
    pub group_address: Ipv4Addr,
}

/// Decodes a v1/v2 report. The cursor sits right after the type byte.
pub fn decode_legacy(cursor: &mut ByteCursor) -> Result<LegacyReport, IgmpError> {
    let response_code = cursor.read_u8()?;
    let _checksum = cursor.read_u16()?;
    let group_address = cursor.read_addr()?;
    Ok(LegacyReport {
        response_code,
        group_address,
    })
}

/// Decodes an IGMPv3 report. The cursor sits right after the type byte.
///
/// Either every announced record is decoded in full, or the whole report is
/// rejected with `DeclaredLengthExceedsBuffer`.
pub fn decode(cursor: &mut ByteCursor) -> Result<MembershipReport, IgmpError> {
    let _reserved = cursor.read_u8()?;
    let _checksum = cursor.read_u16()?;
    let _reserved = cursor.read_u16()?;
    let nrec = cursor.read_u16()? as usize;

    cursor.ensure(nrec * GROUP_RECORD_HEADER_LEN)
        .map_err(|e| IgmpError::declared("group record list", e))?;

    let mut records = Vec::with_capacity(nrec);
    for _ in 0..nrec {
        records.push(decode_record(cursor)?);
    }

    Ok(MembershipReport { records })
}

fn decode_record(cursor: &mut ByteCursor) -> Result<GroupRecord, IgmpError> {
    let header = cursor.take_slice(GROUP_RECORD_HEADER_LEN)
        .map_err(|e| IgmpError::declared("group record", e))?;
    let mut header = ByteCursor::new(header);

    let record_type = RecordType::from(header.read_u8()?);
    let aux_words = header.read_u8()?;
    let nsrc = header.read_u16()? as usize;
    let multicast_address = header.read_addr()?;

    let source_addresses = cursor.read_addrs(nsrc)
        .map_err(|e| IgmpError::declared("record source list", e))?;

    let aux_data = cursor.take_slice(aux_words as usize * 4)
        .map_err(|e| IgmpError::declared("auxiliary data", e))?
        .to_vec();

    Ok(GroupRecord {
        record_type,
        aux_words,
        multicast_address,
        source_addresses,
        aux_data,
    })
}

pub fn encode(report: &MembershipReport) -> Result<Vec<u8>, IgmpError> {
    if report.records.len() > u16::MAX as usize {
        return Err(IgmpError::PacketTooLong(report.records.len() * GROUP_RECORD_HEADER_LEN));
    }

    let total = V3_REPORT_HEADER_LEN + report.records.iter().map(GroupRecord::encoded_len).sum::<usize>();
    if total > MAX_REPORT_LEN {
        return Err(IgmpError::PacketTooLong(total));
    }

    let mut data = Vec::with_capacity(total);
    data.push(IGMP_V3_MEMBERSHIP_REPORT);
    data.extend_from_slice(&[0, 0, 0, 0, 0]);
    data.extend_from_slice(&(report.records.len() as u16).to_be_bytes());

    for record in &report.records {
        let aux_len = record.aux_data.len();
        if aux_len % 4 != 0 || aux_len / 4 > u8::MAX as usize {
            return Err(IgmpError::InvalidAuxData(aux_len));
        }

        data.push(record.record_type.into());
        data.push((aux_len / 4) as u8);
        data.extend_from_slice(&(record.source_addresses.len() as u16).to_be_bytes());
        data.extend_from_slice(&record.multicast_address.octets());
        for source in &record.source_addresses {
            data.extend_from_slice(&source.octets());
        }
        data.extend_from_slice(&record.aux_data);
    }

    checksum::stamp(&mut data, 2);
    Ok(data)
}

pub fn encode_legacy(igmp_type: u8, report: &LegacyReport) -> Vec<u8> {
    let mut data = Vec::with_capacity(query::LEGACY_MESSAGE_LEN);
    data.push(igmp_type);
    data.push(report.response_code);
    data.extend_from_slice(&[0, 0]);
    data.extend_from_slice(&report.group_address.octets());
    checksum::stamp(&mut data, 2);
    data
}

impl std::fmt::Display for GroupRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "  {} {} nsrc:{}", self.multicast_address, self.record_type, self.source_addresses.len())?;
        if !self.aux_data.is_empty() {
            write!(f, " aux:{}", self.aux_data.len())?;
        }
        for source in &self.source_addresses {
            write!(f, "\n    {}", source)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for MembershipReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "IGMPv3 Report nrecs:{}", self.records.len())?;
        for record in &self.records {
            write!(f, "\n{}", record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn record_type_table() {
        for value in 1..=6u8 {
            let record_type = RecordType::from(value);
            assert_ne!(record_type, RecordType::Unknown(value));
            assert_eq!(u8::from(record_type), value);
        }
        assert_eq!(RecordType::from(2).label(), Some("is_ex"));
        assert_eq!(RecordType::from(5).to_string(), "allow");
        assert_eq!(RecordType::from(0), RecordType::Unknown(0));
        assert_eq!(RecordType::from(9).to_string(), "type(9)");
        assert!(RecordType::IsInclude.is_current_state());
        assert!(RecordType::ToExclude.is_filter_mode_change());
        assert!(RecordType::BlockOldSources.is_source_list_change());
    }

    #[test]
    fn decodes_records_with_sources_and_aux_data() {
        let data = hex!(
            "22 00 00 00 00 00 00 02"
            "01 01 00 02 e8 01 01 01 c0 00 02 01 c0 00 02 02 de ad be ef"
            "04 00 00 00 ef ff ff fa"
        );
        let mut cursor = ByteCursor::new(&data[1..]);
        let report = decode(&mut cursor).unwrap();

        assert_eq!(report.records.len(), 2);
        let first = &report.records[0];
        assert_eq!(first.record_type, RecordType::IsInclude);
        assert_eq!(first.aux_words, 1);
        assert_eq!(first.multicast_address, Ipv4Addr::new(232, 1, 1, 1));
        assert_eq!(first.source_addresses, vec![Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(192, 0, 2, 2)]);
        assert_eq!(first.aux_data, vec![0xde, 0xad, 0xbe, 0xef]);

        let second = &report.records[1];
        assert_eq!(second.record_type, RecordType::ToExclude);
        assert_eq!(second.multicast_address, Ipv4Addr::new(239, 255, 255, 250));
        assert!(second.source_addresses.is_empty());
        assert!(second.aux_data.is_empty());
        assert!(cursor.is_empty());
    }

    #[test]
    fn record_count_beyond_buffer() {
        let data = hex!("22 00 00 00 00 00 00 03 02 00 00 00 ef 01 01 01");
        let mut cursor = ByteCursor::new(&data[1..]);
        assert_eq!(
            decode(&mut cursor),
            Err(IgmpError::DeclaredLengthExceedsBuffer { field: "group record list", declared: 24, remaining: 8 }),
        );
    }

    #[test]
    fn record_source_list_beyond_buffer() {
        let data = hex!("22 00 00 00 00 00 00 01 01 00 00 02 e8 01 01 01 c0 00 02 01");
        let mut cursor = ByteCursor::new(&data[1..]);
        assert_eq!(
            decode(&mut cursor),
            Err(IgmpError::DeclaredLengthExceedsBuffer { field: "record source list", declared: 8, remaining: 4 }),
        );
    }

    #[test]
    fn aux_data_beyond_buffer() {
        let data = hex!("22 00 00 00 00 00 00 01 02 02 00 00 ef 01 01 01 00 00 00 00");
        let mut cursor = ByteCursor::new(&data[1..]);
        assert_eq!(
            decode(&mut cursor),
            Err(IgmpError::DeclaredLengthExceedsBuffer { field: "auxiliary data", declared: 8, remaining: 4 }),
        );
    }

    #[test]
    fn later_record_header_beyond_buffer() {
        // first record eats the bytes the second header needs
        let data = hex!("22 00 00 00 00 00 00 02 01 00 00 01 e8 01 01 01 c0 00 02 01 00 00 00 00");
        let mut cursor = ByteCursor::new(&data[1..]);
        assert_eq!(
            decode(&mut cursor),
            Err(IgmpError::DeclaredLengthExceedsBuffer { field: "group record", declared: 8, remaining: 4 }),
        );
    }

    #[test]
    fn short_header_is_an_underrun() {
        let data = hex!("22 00 00 00 00");
        let mut cursor = ByteCursor::new(&data[1..]);
        assert_eq!(decode(&mut cursor), Err(IgmpError::BufferUnderrun { needed: 2, remaining: 1 }));
    }

    #[test]
    fn encode_stamps_checksum() {
        let mut record = GroupRecord::new(RecordType::AllowNewSources, Ipv4Addr::new(232, 0, 0, 1), vec![Ipv4Addr::new(10, 1, 1, 1)]);
        record.aux_data = vec![1, 2, 3, 4];
        let report = MembershipReport { records: vec![record] };

        let data = encode(&report).unwrap();
        assert_eq!(data.len(), V3_REPORT_HEADER_LEN + GROUP_RECORD_HEADER_LEN + 4 + 4);
        assert!(checksum::verify(&data));

        let decoded = decode(&mut ByteCursor::new(&data[1..])).unwrap();
        assert_eq!(decoded.records[0].aux_words, 1);
        assert_eq!(decoded.records[0].aux_data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn encode_rejects_unaligned_aux_data() {
        let mut record = GroupRecord::new(RecordType::IsExclude, Ipv4Addr::new(239, 1, 1, 1), vec![]);
        record.aux_data = vec![0; 3];
        let report = MembershipReport { records: vec![record] };
        assert_eq!(encode(&report), Err(IgmpError::InvalidAuxData(3)));
    }

    #[test]
    fn encode_rejects_oversized_report() {
        let record = GroupRecord::new(RecordType::IsInclude, Ipv4Addr::new(232, 0, 0, 1), vec![Ipv4Addr::new(10, 0, 0, 1); 400]);
        let report = MembershipReport { records: vec![record] };
        assert_eq!(encode(&report), Err(IgmpError::PacketTooLong(V3_REPORT_HEADER_LEN + GROUP_RECORD_HEADER_LEN + 1600)));
    }

    #[test]
    fn display_uses_labels() {
        let report = MembershipReport {
            records: vec![
                GroupRecord::new(RecordType::ToInclude, Ipv4Addr::new(232, 1, 1, 1), vec![Ipv4Addr::new(192, 0, 2, 1)]),
                GroupRecord::new(RecordType::Unknown(42), Ipv4Addr::new(239, 1, 1, 1), vec![]),
            ],
        };
        assert_eq!(
            report.to_string(),
            "IGMPv3 Report nrecs:2\n  232.1.1.1 to_in nsrc:1\n    192.0.2.1\n  239.1.1.1 type(42) nsrc:0",
        );
    }
}
