use std::io::SeekFrom;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use crate::error::{FramingError, ResyncFailure};
use crate::header::{align_down, decode_header, HEADER_SIZE, QUAD_SIZE, SYNC_MAJIK};
use crate::reader::ReaderConfig;
use crate::registry::{TypeRegistry, DT_REBOOT, DT_SYNC};
use crate::source::ByteSource;

/// Locates the next plausible SYNC or REBOOT record.
///
/// Built from the registry once per reader; the landmark lengths never change
/// during a run.
#[derive(Debug, Clone, Copy)]
pub struct Resynchronizer {
    sync_len:      u16,
    reboot_len:    u16,
    hdr_offset:    u64,
    max_zero_sigs: usize,
}

impl Resynchronizer {
    pub fn new(registry: &TypeRegistry, config: &ReaderConfig) -> Self {
        Self {
            sync_len:      registry.required_length(DT_SYNC),
            reboot_len:    registry.required_length(DT_REBOOT),
            hdr_offset:    config.resync_hdr_offset,
            max_zero_sigs: config.max_zero_sigs,
        }
    }

    /// False when the registry lacks a SYNC or REBOOT length.
    pub fn is_supported(&self) -> bool {
        self.sync_len != 0 && self.reboot_len != 0
    }

    fn is_landmark(&self, record_type: u16, record_length: u16) -> bool {
        (record_type == DT_SYNC && record_length == self.sync_len)
            || (record_type == DT_REBOOT && record_length == self.reboot_len)
    }

    /// Scan forward from `start` and leave `source` at the next plausible
    /// SYNC/REBOOT header.  Returns that header's offset.
    pub fn resync<S: ByteSource + ?Sized>(&self, source: &mut S, start: u64) -> Result<u64, FramingError> {
        warn!("*** resync started @{start} (0x{start:x})");
        let mut offset = align_down(start);
        if offset != start {
            debug!("*** resync: unaligned offset: {start} (0x{start:x}) -> {offset} (0x{offset:x})");
        }
        if !self.is_supported() {
            return Err(FramingError::ResyncUnsupported);
        }
        seek_to(source, offset)?;

        let mut zero_sigs = 0usize;
        let mut quad      = [0u8; QUAD_SIZE];
        let mut hdr       = [0u8; HEADER_SIZE];

        loop {
            // Walk quads until the majik turns up.
            loop {
                let n = source
                    .read_full(&mut quad)
                    .map_err(|e| exhausted(offset, ResyncFailure::Io(e)))?;
                match n {
                    0 => return Err(exhausted(offset, ResyncFailure::EndOfSource)),
                    n if n < QUAD_SIZE => {
                        return Err(exhausted(offset, ResyncFailure::ShortRead { wanted: QUAD_SIZE, got: n }))
                    }
                    _ => {}
                }
                offset += QUAD_SIZE as u64;

                let sig = LittleEndian::read_u32(&quad);
                if sig == SYNC_MAJIK {
                    break;
                }
                if sig == 0 {
                    zero_sigs += 1;
                    if zero_sigs > self.max_zero_sigs {
                        return Err(exhausted(offset, ResyncFailure::TooManyZeroWords(self.max_zero_sigs)));
                    }
                } else {
                    zero_sigs = 0;
                }
            }

            // `offset` is just past the majik; back up to the presumed start.
            let Some(attempt) = offset.checked_sub(self.hdr_offset) else {
                debug!("*** resync: majik @{} too close to start of stream", offset - QUAD_SIZE as u64);
                continue;
            };
            debug!("*** resync: found MAJIK @{0} (0x{0:x})", offset - QUAD_SIZE as u64);
            seek_to(source, attempt)?;

            let n = source
                .read_full(&mut hdr)
                .map_err(|e| exhausted(attempt, ResyncFailure::Io(e)))?;
            if n < HEADER_SIZE {
                return Err(exhausted(attempt, ResyncFailure::ShortRead { wanted: HEADER_SIZE, got: n }));
            }
            let header = decode_header(&hdr)?;

            if self.is_landmark(header.record_type, header.record_length) {
                seek_to(source, attempt)?;
                return Ok(attempt);
            }

            offset = attempt + self.hdr_offset;
            debug!(
                "*** resync: failed len/rtype @{attempt} (0x{attempt:x}): len: {}, type: {}, rec: {}, moving to: @{offset} (0x{offset:x})",
                header.record_length, header.record_type, header.record_number,
            );
            seek_to(source, offset)?;
        }
    }
}

fn exhausted(offset: u64, reason: ResyncFailure) -> FramingError {
    FramingError::ResyncExhausted { offset, reason }
}

fn seek_to<S: ByteSource + ?Sized>(source: &mut S, offset: u64) -> Result<(), FramingError> {
    source
        .seek(SeekFrom::Start(offset))
        .map(|_| ())
        .map_err(|e| exhausted(offset, ResyncFailure::Io(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::StreamBuilder;
    use crate::header::MAX_ZERO_SIGS;
    use crate::registry::{TypeDescriptor, DT_NOTE};
    use crate::source::SeekableSource;
    use std::io::Cursor;

    fn resync_in(bytes: Vec<u8>, start: u64) -> (Result<u64, FramingError>, u64) {
        let reg = TypeRegistry::core();
        let rs  = Resynchronizer::new(&reg, &ReaderConfig::default());
        let mut src = SeekableSource::new(Cursor::new(bytes));
        let res = rs.resync(&mut src, start);
        let pos = src.tell().unwrap();
        (res, pos)
    }

    #[test]
    fn lands_on_next_sync() {
        let mut b = StreamBuilder::new();
        b.record(DT_NOTE, 1, b"garbage ahead of the landmark");
        let sync_at = b.sync(2);
        b.record(DT_NOTE, 3, b"after");

        let (res, pos) = resync_in(b.into_bytes(), 1);
        assert_eq!(res.unwrap(), sync_at);
        assert_eq!(pos, sync_at);
    }

    #[test]
    fn lands_on_reboot() {
        let mut b = StreamBuilder::new();
        b.zeros(64);
        let at = b.reboot(1);
        let (res, _) = resync_in(b.into_bytes(), 0);
        assert_eq!(res.unwrap(), at);
    }

    #[test]
    fn majik_inside_payload_is_skipped() {
        let mut b = StreamBuilder::new();
        // A NOTE whose payload happens to contain the majik 32 bytes in.
        let mut payload = vec![0x11u8; 40];
        payload[14..18].copy_from_slice(&SYNC_MAJIK.to_le_bytes());
        b.record(DT_NOTE, 1, &payload);
        let sync_at = b.sync(2);

        let (res, _) = resync_in(b.into_bytes(), 0);
        assert_eq!(res.unwrap(), sync_at);
    }

    #[test]
    fn long_zero_run_gives_up() {
        let mut b = StreamBuilder::new();
        b.zeros((MAX_ZERO_SIGS + 8) * 4);
        b.sync(1);

        match resync_in(b.into_bytes(), 0).0 {
            Err(FramingError::ResyncExhausted { reason: ResyncFailure::TooManyZeroWords(n), .. }) => {
                assert_eq!(n, MAX_ZERO_SIGS)
            }
            other => panic!("expected zero-run exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn zero_run_at_threshold_is_tolerated() {
        let mut b = StreamBuilder::new();
        b.raw(&[0xaa; 4]);
        // Exactly the limit; the marker keeps the sync's own zero quads
        // from extending the run.
        b.zeros(MAX_ZERO_SIGS * 4);
        b.raw(&[0xbb; 4]);
        let at = b.sync(1);
        assert_eq!(resync_in(b.into_bytes(), 0).0.unwrap(), at);
    }

    #[test]
    fn end_of_data_is_fatal() {
        let (res, _) = resync_in(vec![0x55; 64], 0);
        assert!(matches!(
            res,
            Err(FramingError::ResyncExhausted { reason: ResyncFailure::EndOfSource, .. })
        ));
    }

    #[test]
    fn ragged_tail_is_a_short_read() {
        let (res, _) = resync_in(vec![0x55; 66], 0);
        assert!(matches!(
            res,
            Err(FramingError::ResyncExhausted { reason: ResyncFailure::ShortRead { wanted: 4, got: 2 }, .. })
        ));
    }

    #[test]
    fn unaligned_start_rounds_down() {
        let mut b = StreamBuilder::new();
        let at = b.sync(1);
        // Starting inside the first quad still finds the record at 0.
        assert_eq!(resync_in(b.into_bytes(), 3).0.unwrap(), at);
    }

    #[test]
    fn missing_landmarks_are_unsupported() {
        let reg = TypeRegistry::builder()
            .register(DT_SYNC, TypeDescriptor::new("SYNC", 36))
            .build();
        let rs = Resynchronizer::new(&reg, &ReaderConfig::default());
        assert!(!rs.is_supported());
        let mut src = SeekableSource::new(Cursor::new(vec![0u8; 64]));
        assert!(matches!(rs.resync(&mut src, 0), Err(FramingError::ResyncUnsupported)));
    }
}
