//! Record checksum.
//!
//! The producer sums every byte of the record with the checksum field held
//! at zero, then lays the low 16 bits into the field.  Verification sums the
//! record as stored and subtracts the two stored checksum bytes back out, so
//! no copy or second pass is needed.

use byteorder::{ByteOrder, LittleEndian};

use crate::header::{CHECKSUM_OFFSET, HEADER_SIZE};

/// Checksum of `record` with the 16-bit field at `checksum_offset` removed.
///
/// `None` when `record` is too short to hold the field.
pub fn compute_checksum(record: &[u8], checksum_offset: usize) -> Option<u16> {
    let field  = record.get(checksum_offset..checksum_offset.checked_add(2)?)?;
    let stored = LittleEndian::read_u16(field);
    let sum: u64 = record.iter().map(|&b| b as u64).sum();
    let sum = sum
        .wrapping_sub(((stored & 0xff00) >> 8) as u64)
        .wrapping_sub((stored & 0x00ff) as u64);
    Some((sum & 0xffff) as u16)
}

/// Checksum stored in the header of `record`.
pub fn stored_checksum(record: &[u8]) -> Option<u16> {
    if record.len() < HEADER_SIZE {
        return None;
    }
    Some(LittleEndian::read_u16(&record[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2]))
}

/// True when the stored checksum matches the record contents.
pub fn verify(record: &[u8]) -> bool {
    match stored_checksum(record) {
        Some(stored) => compute_checksum(record, CHECKSUM_OFFSET) == Some(stored),
        None         => false,
    }
}

/// Compute and embed the checksum of a complete record in place.
pub fn seal(record: &mut [u8]) {
    if record.len() < HEADER_SIZE {
        return;
    }
    record[CHECKSUM_OFFSET]     = 0;
    record[CHECKSUM_OFFSET + 1] = 0;
    if let Some(sum) = compute_checksum(record, CHECKSUM_OFFSET) {
        LittleEndian::write_u16(&mut record[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2], sum);
    }
}
