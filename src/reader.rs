//! Record reader — the framing state machine.
//!
//! Each pull walks one attempt through
//!
//! ```text
//! ALIGN → READ_HEADER → CHECK_LENGTH_BOUNDS → CHECK_RECNUM → READ_PAYLOAD
//!       → VERIFY_CHECKSUM → CHECK_TYPE_LENGTH → EMIT
//! ```
//!
//! and any failed check hands the offset to the [`Resynchronizer`] and
//! starts over at `ALIGN` wherever it lands.  A short read on the header or
//! payload ends the pull with [`FramingError::EndOfStream`]; the source is
//! rewound to the attempt's start so a later pull on a growing stream picks
//! the record up once it is complete.
//!
//! # Loop guard
//! A resync can land on a SYNC/REBOOT whose checksum is bad; resyncing from
//! there finds the same record again.  When an attempt would start at the
//! offset the previous attempt started at, the reader first steps
//! `resync_hdr_offset` bytes past it.  Without this the reader spins forever
//! on one bad landmark.

use std::io::SeekFrom;

use tracing::{debug, error, trace, warn};

use crate::checksum::compute_checksum;
use crate::error::FramingError;
use crate::header::{align_up, decode_header, Header, CHECKSUM_OFFSET, HEADER_SIZE, MAX_ZERO_SIGS, RESYNC_HDR_OFFSET, RLEN_MAX};
use crate::record::Record;
use crate::recovery::Resynchronizer;
use crate::registry::TypeRegistry;
use crate::source::ByteSource;
use crate::stats::StreamStats;

/// Framing limits.  The defaults match the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Largest acceptable `record_length`.
    pub rlen_max:          u16,
    /// Record start to first byte past its SYNC majik.
    pub resync_hdr_offset: u64,
    /// Consecutive zero quads a resync scan tolerates.
    pub max_zero_sigs:     usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            rlen_max:          RLEN_MAX,
            resync_hdr_offset: RESYNC_HDR_OFFSET,
            max_zero_sigs:     MAX_ZERO_SIGS,
        }
    }
}

/// Outcome of one framing attempt that did not end the pull.
enum Attempt {
    Emit(Record),
    Resync(FramingError),
}

pub struct RecordReader<'r, S: ByteSource> {
    source:   S,
    registry: &'r TypeRegistry,
    config:   ReaderConfig,
    resync:   Resynchronizer,
    stats:    StreamStats,
    done:     bool,
}

impl<'r, S: ByteSource> RecordReader<'r, S> {
    pub fn new(source: S, registry: &'r TypeRegistry) -> Self {
        Self::with_config(source, registry, ReaderConfig::default())
    }

    pub fn with_config(source: S, registry: &'r TypeRegistry, config: ReaderConfig) -> Self {
        Self {
            source,
            registry,
            config,
            resync: Resynchronizer::new(registry, &config),
            stats: StreamStats::new(),
            done: false,
        }
    }

    pub fn registry(&self) -> &'r TypeRegistry { self.registry }
    pub fn config(&self)   -> &ReaderConfig    { &self.config }
    pub fn stats(&self)    -> &StreamStats     { &self.stats }
    pub fn stats_mut(&mut self) -> &mut StreamStats { &mut self.stats }
    pub fn source_mut(&mut self) -> &mut S { &mut self.source }
    pub fn into_source(self) -> S { self.source }

    /// Current source offset.
    pub fn position(&mut self) -> Result<u64, FramingError> {
        Ok(self.source.tell()?)
    }

    /// Reposition the reader.  The next pull aligns from here.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, FramingError> {
        Ok(self.source.seek(pos)?)
    }

    /// Re-arm the iterator after it reported end of stream, for sources
    /// that may have grown since.
    pub fn resume(&mut self) {
        self.done = false;
    }

    /// Pull the next validated record.
    ///
    /// Returns `EndOfStream` when the source runs dry, or a fatal error
    /// when resynchronization is impossible.  Recoverable framing errors
    /// never reach the caller.
    pub fn next_record(&mut self) -> Result<Record, FramingError> {
        let mut last_attempt: Option<u64> = None;
        let mut offset = self.source.tell()?;

        loop {
            // ALIGN
            let aligned = align_up(offset);
            if aligned != offset {
                debug!(
                    "*** aligning offset {offset} (0x{offset:x}) -> {aligned} (0x{aligned:x}) [{} bytes]",
                    aligned - offset
                );
                self.source.seek(SeekFrom::Start(aligned))?;
                offset = aligned;
            }

            if last_attempt == Some(offset) {
                let past = offset + self.config.resync_hdr_offset;
                warn!("*** resyncing: moving past current majik to: @{past} (0x{past:x})");
                offset = self.resync_from(past)?;
                continue;
            }
            last_attempt = Some(offset);

            match self.attempt(offset)? {
                Attempt::Emit(record) => return Ok(record),
                Attempt::Resync(reason) => {
                    warn!("*** {reason}");
                    offset = self.resync_from(offset)?;
                }
            }
        }
    }

    fn attempt(&mut self, offset: u64) -> Result<Attempt, FramingError> {
        // READ_HEADER
        let mut buf = vec![0u8; HEADER_SIZE];
        let got = self.source.read_full(&mut buf)?;
        if got < HEADER_SIZE {
            debug!("*** record header read too short: wanted {HEADER_SIZE}, got {got}, @{offset}");
            return self.end_of_stream(offset);
        }
        let header = decode_header(&buf)?;
        let len    = header.record_length;

        // CHECK_LENGTH_BOUNDS
        if (len as usize) < HEADER_SIZE || len > self.config.rlen_max {
            self.stats.invalid_lengths += 1;
            return Ok(Attempt::Resync(FramingError::InvalidLength { length: len, offset, required: None }));
        }

        // CHECK_RECNUM
        if header.record_number == 0 {
            self.stats.zero_record_numbers += 1;
            return Ok(Attempt::Resync(FramingError::ZeroRecordNumber { offset }));
        }

        // READ_PAYLOAD
        buf.resize(len as usize, 0);
        let got = self.source.read_full(&mut buf[HEADER_SIZE..])?;
        if HEADER_SIZE + got < len as usize {
            debug!("*** record read too short: wanted {len}, got {}, @{offset}", HEADER_SIZE + got);
            return self.end_of_stream(offset);
        }

        // VERIFY_CHECKSUM
        let computed = compute_checksum(&buf, CHECKSUM_OFFSET)
            .ok_or(FramingError::TruncatedInput { wanted: HEADER_SIZE, got: buf.len() })?;
        if computed != header.checksum {
            self.stats.checksum_errors += 1;
            warn!("{}", describe(&header, offset, self.registry));
            trace!("    {}", hex::encode(&buf));
            return Ok(Attempt::Resync(FramingError::ChecksumMismatch {
                offset,
                wanted: header.checksum,
                got:    computed,
            }));
        }

        // CHECK_TYPE_LENGTH
        let required = self.registry.required_length(header.record_type);
        if required != 0 && required != len {
            self.stats.invalid_lengths += 1;
            return Ok(Attempt::Resync(FramingError::InvalidLength { length: len, offset, required: Some(required) }));
        }

        // EMIT
        self.stats.total_records += 1;
        self.stats.total_bytes   += len as u64;
        Ok(Attempt::Emit(Record::new(offset, header, buf)))
    }

    fn end_of_stream(&mut self, offset: u64) -> Result<Attempt, FramingError> {
        self.source.seek(SeekFrom::Start(offset))?;
        Err(FramingError::EndOfStream { offset })
    }

    fn resync_from(&mut self, offset: u64) -> Result<u64, FramingError> {
        self.stats.resyncs += 1;
        self.resync.resync(&mut self.source, offset).map_err(|e| {
            error!("*** {e}");
            e
        })
    }
}

impl<S: ByteSource> Iterator for RecordReader<'_, S> {
    type Item = Result<Record, FramingError>;

    /// `None` after end of stream (see [`RecordReader::resume`]); a fatal
    /// error is yielded once and then the iterator is exhausted.
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(record) => Some(Ok(record)),
            Err(e) if e.is_end_of_stream() => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// One-line description of a record header, used for problem records.
///
/// `offset recnum systime len type name @offset (0xoffset) [0xrecsum]`
pub fn describe(header: &Header, offset: u64, registry: &TypeRegistry) -> String {
    format!(
        "{:8} {:6}  {:7}  {:3}    {:2}  {:12} @{} (0x{:06x}) [0x{:04x}]",
        offset,
        header.record_number,
        header.system_time,
        header.record_length,
        header.record_type,
        registry.name(header.record_type),
        offset,
        offset,
        header.checksum,
    )
}
