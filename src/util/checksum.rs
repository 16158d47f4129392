//! Internet checksum (RFC 1071).
//!
//! The data is summed as big-endian 16-bit words with end-around carry. A trailing
//! odd byte is the high-order byte of a zero-padded final word.

/// Computes the ones'-complement checksum of `data`.
///
/// An empty range yields `0xffff`.
pub fn compute(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
        if sum > 0xffff {
            sum = (sum >> 16) + (sum & 0xffff);
        }
    }

    if let [last] = words.remainder() {
        sum += u16::from_be_bytes([*last, 0]) as u32;
    }

    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }

    !(sum as u16)
}

/// Self-check over a message with its checksum field in place.
pub fn verify(data: &[u8]) -> bool {
    compute(data) == 0
}

/// Zeroes the 16-bit checksum field at `offset`, computes the checksum over all of
/// `data` and writes it back in network order.
///
/// Panics if the field lies outside `data`.
pub fn stamp(data: &mut [u8], offset: usize) {
    data[offset..(offset + 2)].fill(0);
    let sum = compute(data);
    data[offset..(offset + 2)].copy_from_slice(&sum.to_be_bytes());
}
