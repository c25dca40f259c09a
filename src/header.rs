//! Typed-data record header — fixed little-endian layout.
//!
//! ```text
//! offset  size  field
//!      0     2  record_length   total bytes, header included, pad excluded
//!      2     2  record_type     see `registry::builtin` for the known ids
//!      4     4  record_number   assigned by the producer, never 0
//!      8     8  system_time     device ticks since last reboot
//!     16     2  checksum        byte-sum of the record with this field = 0
//! ```
//!
//! Every record starts on a quad (4-byte) boundary.  The 0–3 pad bytes that
//! follow a record are not part of `record_length`.
//!
//! Decoding here is purely structural.  Whether a header is *plausible* is
//! the record reader's call.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::FramingError;

/// Bytes occupied by the packed header on the wire.
pub const HEADER_SIZE: usize = 18;
/// Byte offset of the 16-bit checksum inside the header.
pub const CHECKSUM_OFFSET: usize = 16;
/// Largest `record_length` the producer ever writes.
pub const RLEN_MAX: u16 = 1024;
/// Signature laid down in every SYNC and REBOOT record.
pub const SYNC_MAJIK: u32 = 0xdedf_00ef;
/// Offset of `SYNC_MAJIK` from the start of a SYNC/REBOOT record.
pub const SYNC_MAJIK_OFFSET: usize = 32;
/// Distance from a record start to the first byte past its `SYNC_MAJIK`.
pub const RESYNC_HDR_OFFSET: u64 = (SYNC_MAJIK_OFFSET + QUAD_SIZE) as u64;
/// Consecutive zero quads tolerated by a resync scan (4 KiB of zeros).
pub const MAX_ZERO_SIGS: usize = 1024;
/// The first sector of a data stream is the directory.
pub const DBLK_DIR_SIZE: u64 = 0x200;
/// Revision of the device's type table this crate understands.
pub const DT_H_REVISION: u32 = 16;

pub const QUAD_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub record_length: u16,
    pub record_type:   u16,
    pub record_number: u32,
    pub system_time:   u64,
    pub checksum:      u16,
}

impl Header {
    /// Payload bytes implied by `record_length`, or 0 if the length is
    /// below the header size.
    pub fn payload_len(&self) -> usize {
        (self.record_length as usize).saturating_sub(HEADER_SIZE)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.record_length)?;
        writer.write_u16::<LittleEndian>(self.record_type)?;
        writer.write_u32::<LittleEndian>(self.record_number)?;
        writer.write_u64::<LittleEndian>(self.system_time)?;
        writer.write_u16::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            record_length: reader.read_u16::<LittleEndian>()?,
            record_type:   reader.read_u16::<LittleEndian>()?,
            record_number: reader.read_u32::<LittleEndian>()?,
            system_time:   reader.read_u64::<LittleEndian>()?,
            checksum:      reader.read_u16::<LittleEndian>()?,
        })
    }
}

/// Parse the first `HEADER_SIZE` bytes of `wire`.
///
/// Extra trailing bytes (payload) are ignored.
pub fn decode_header(wire: &[u8]) -> Result<Header, FramingError> {
    if wire.len() < HEADER_SIZE {
        return Err(FramingError::TruncatedInput { wanted: HEADER_SIZE, got: wire.len() });
    }
    Ok(Header {
        record_length: LittleEndian::read_u16(&wire[0..2]),
        record_type:   LittleEndian::read_u16(&wire[2..4]),
        record_number: LittleEndian::read_u32(&wire[4..8]),
        system_time:   LittleEndian::read_u64(&wire[8..16]),
        checksum:      LittleEndian::read_u16(&wire[16..18]),
    })
}

pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    LittleEndian::write_u16(&mut out[0..2], header.record_length);
    LittleEndian::write_u16(&mut out[2..4], header.record_type);
    LittleEndian::write_u32(&mut out[4..8], header.record_number);
    LittleEndian::write_u64(&mut out[8..16], header.system_time);
    LittleEndian::write_u16(&mut out[16..18], header.checksum);
    out
}

/// Round `offset` up to the next quad boundary.
#[inline]
pub fn align_up(offset: u64) -> u64 {
    (offset + 3) & !3
}

/// Round `offset` down to a quad boundary.
#[inline]
pub fn align_down(offset: u64) -> u64 {
    offset & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_known_bytes() {
        let wire = [
            0x24, 0x00,                         // len 36
            0x03, 0x00,                         // SYNC
            0x07, 0x00, 0x00, 0x00,             // recnum 7
            0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0xcd, 0xab,
        ];
        let h = decode_header(&wire).unwrap();
        assert_eq!(h.record_length, 36);
        assert_eq!(h.record_type, 3);
        assert_eq!(h.record_number, 7);
        assert_eq!(h.system_time, 0x0201);
        assert_eq!(h.checksum, 0xabcd);
        assert_eq!(h.payload_len(), 18);
    }

    #[test]
    fn short_input_is_truncated() {
        match decode_header(&[0u8; 17]) {
            Err(FramingError::TruncatedInput { wanted, got }) => {
                assert_eq!(wanted, HEADER_SIZE);
                assert_eq!(got, 17);
            }
            other => panic!("expected TruncatedInput, got {other:?}"),
        }
    }

    #[test]
    fn slice_and_stream_forms_agree() {
        let h = Header {
            record_length: 40,
            record_type:   4,
            record_number: 0x1234_5678,
            system_time:   u64::MAX - 1,
            checksum:      0x0ff0,
        };
        let mut streamed = Vec::new();
        h.write(&mut streamed).unwrap();
        assert_eq!(streamed, encode_header(&h));
        assert_eq!(Header::read(&streamed[..]).unwrap(), h);
    }

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(37), 40);
        assert_eq!(align_up(40), 40);
        assert_eq!(align_down(39), 36);
        assert_eq!(RESYNC_HDR_OFFSET, 36);
    }
}
