//! Dump driver: pull records, filter them and print what the decoders make
//! of them.
//!
//! ```
//! use std::io::Cursor;
//! use tagdump::dump::{dump, CancelToken, DumpOptions};
//! use tagdump::fixture::StreamBuilder;
//! use tagdump::registry::TypeRegistry;
//! use tagdump::source::SeekableSource;
//!
//! let mut stream = StreamBuilder::new();
//! stream.sync(1);
//!
//! let registry = TypeRegistry::core();
//! let source   = SeekableSource::new(Cursor::new(stream.into_bytes()));
//! let mut out  = Vec::new();
//! let summary  = dump(source, &registry, &DumpOptions::default(), &CancelToken::new(), &mut out)?;
//! assert_eq!(summary.records_output, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeSet;
use std::io::{self, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::continuity::ContinuityTracker;
use crate::error::FramingError;
use crate::header::{DBLK_DIR_SIZE, DT_H_REVISION};
use crate::reader::{describe, ReaderConfig, RecordReader};
use crate::record::Record;
use crate::registry::TypeRegistry;
use crate::source::{ByteSource, SeekableSource, TailSource, DEFAULT_POLL_INTERVAL};
use crate::stats::{StatsReport, StreamStats};

/// Column titles matching the problem-record line from [`describe`].
pub const TITLE: &str = "--- offset  recnum  systime  len  type  name";

/// Bytes per row of a verbose hex dump.
const HEX_ROW: usize = 16;

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Cooperative stop flag.  Checked between records, never mid-record.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown record type '{0}'")]
    UnknownType(String),
}

// ── DumpOptions ──────────────────────────────────────────────────────────────

/// End-of-run report layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    None,
}

#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Start past the directory sector at the head of a device stream.
    pub skip_directory: bool,
    /// Starting offset.  `-1` is end of data, other negatives count back
    /// from it.
    pub jump:           Option<i64>,
    /// Stop at the first record starting beyond this offset.
    pub end_pos:        Option<u64>,
    pub start_rec:      Option<u32>,
    /// Stop at the first record numbered above this.
    pub last_rec:       Option<u32>,
    /// Record types to show, by number or case-insensitive name.  Empty
    /// shows everything.
    pub rtypes:         Vec<String>,
    /// Stop after this many records are output.
    pub limit:          Option<u64>,
    /// 0 headlines only, 1 decoded fields, 3 raw header and hex, 5 dispatch
    /// diagnostics.
    pub verbose:        u8,
    /// Follow the input as it grows.  Output is flushed after every record.
    pub tail:           bool,
    pub poll_interval:  Duration,
    /// In tail mode, give up after this long without new data.
    pub idle_timeout:   Option<Duration>,
    pub reader:         ReaderConfig,
    pub report:         ReportFormat,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            skip_directory: false,
            jump:           None,
            end_pos:        None,
            start_rec:      None,
            last_rec:       None,
            rtypes:         Vec::new(),
            limit:          None,
            verbose:        0,
            tail:           false,
            poll_interval:  DEFAULT_POLL_INTERVAL,
            idle_timeout:   None,
            reader:         ReaderConfig::default(),
            report:         ReportFormat::Text,
        }
    }
}

impl DumpOptions {
    /// Resolve `rtypes` against `registry`.  `None` means no filtering.
    pub fn type_filter(&self, registry: &TypeRegistry) -> Result<Option<BTreeSet<u16>>, DumpError> {
        if self.rtypes.is_empty() {
            return Ok(None);
        }
        self.rtypes
            .iter()
            .map(|t| {
                let t = t.trim();
                t.parse::<u16>()
                    .ok()
                    .or_else(|| registry.id_of(t))
                    .ok_or_else(|| DumpError::UnknownType(t.to_owned()))
            })
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Some)
    }

    /// Open `path` as a tail source or a plain seekable file, per `tail`.
    pub fn open_source(&self, path: &Path, cancel: &CancelToken) -> io::Result<Box<dyn ByteSource>> {
        if !self.tail {
            return Ok(Box::new(SeekableSource::open(path)?));
        }
        let mut src = TailSource::open(path)?
            .with_poll_interval(self.poll_interval)
            .with_cancel(cancel.clone());
        if let Some(idle) = self.idle_timeout {
            src = src.with_idle_timeout(idle);
        }
        Ok(Box::new(src))
    }
}

// ── Summary ──────────────────────────────────────────────────────────────────

/// Why a dump run ended.
#[derive(Debug)]
pub enum StopReason {
    EndOfStream,
    Limit,
    LastRecord,
    EndPosition,
    Cancelled,
    /// Resynchronization failed or the source errored.
    Failed(FramingError),
}

#[derive(Debug)]
pub struct DumpSummary {
    pub report:         StatsReport,
    pub stop:           StopReason,
    pub records_output: u64,
    pub bytes_output:   u64,
}

impl DumpSummary {
    pub fn stats(&self) -> &StreamStats {
        &self.report.stats
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.stop, StopReason::Failed(_))
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// Dump every record of `source` to `out`.
///
/// Fatal framing errors end the run but are not returned as `Err`: the
/// end-of-run report is still written and the error is in
/// [`DumpSummary::stop`].  `Err` is reserved for setup and output failures.
pub fn dump<S: ByteSource, W: Write>(
    source:   S,
    registry: &TypeRegistry,
    opts:     &DumpOptions,
    cancel:   &CancelToken,
    out:      &mut W,
) -> Result<DumpSummary, DumpError> {
    let started_at = Utc::now();
    let filter     = opts.type_filter(registry)?;

    let mut reader = RecordReader::with_config(source, registry, opts.reader);
    reader.stats_mut().reset();
    position(&mut reader, opts)?;

    if opts.verbose >= 5 {
        writeln!(
            out,
            "tagdump {}  dt_h_revision: {DT_H_REVISION}  record types: {}\n",
            env!("CARGO_PKG_VERSION"),
            registry.len(),
        )?;
    }
    writeln!(out, "{TITLE}")?;
    if opts.tail {
        out.flush()?;
    }

    let mut continuity     = ContinuityTracker::new();
    let mut records_output = 0u64;
    let mut bytes_output   = 0u64;

    let stop = loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        let record = match reader.next_record() {
            Ok(record) => record,
            // A tail source gives up its wait when cancelled.
            Err(e) if e.is_end_of_stream() && cancel.is_cancelled() => break StopReason::Cancelled,
            Err(e) if e.is_end_of_stream() => break StopReason::EndOfStream,
            Err(e) => {
                error!("*** read loop stopped: {e}");
                break StopReason::Failed(e);
            }
        };

        if let Some(anomaly) = continuity.observe(record.record_number(), record.offset(), reader.stats_mut()) {
            writeln!(out, "{anomaly}")?;
            if opts.tail {
                out.flush()?;
            }
        }

        let number = record.record_number();
        if filter.as_ref().is_some_and(|ids| !ids.contains(&record.record_type())) {
            continue;
        }
        if opts.start_rec.is_some_and(|low| number < low) {
            continue;
        }
        if opts.last_rec.is_some_and(|high| number > high) {
            break StopReason::LastRecord;
        }
        if opts.end_pos.is_some_and(|end| record.offset() > end) {
            break StopReason::EndPosition;
        }

        reader.stats_mut().count_type(record.record_type(), registry);
        dispatch(&record, registry, opts.verbose, reader.stats_mut(), out)?;
        if opts.tail {
            out.flush()?;
        }

        records_output += 1;
        bytes_output   += record.len() as u64;
        if opts.limit.is_some_and(|n| records_output >= n) {
            break StopReason::Limit;
        }
    };

    if matches!(stop, StopReason::Cancelled) {
        writeln!(out, "\n\n*** user stop")?;
    }
    debug!("dump stopped: {stop:?}");

    let end_offset = reader.position()?;
    let report     = reader.stats().report(registry, end_offset, started_at);
    match opts.report {
        ReportFormat::Text => writeln!(out, "\n{}", report.summary())?,
        ReportFormat::Json => writeln!(out, "{}", report.to_json().map_err(io::Error::from)?)?,
        ReportFormat::None => {}
    }
    info!(records = records_output, bytes = bytes_output, end_offset, "dump finished");

    Ok(DumpSummary { report, stop, records_output, bytes_output })
}

fn position<S: ByteSource>(reader: &mut RecordReader<'_, S>, opts: &DumpOptions) -> Result<(), DumpError> {
    if opts.skip_directory {
        reader.seek(SeekFrom::Start(DBLK_DIR_SIZE))?;
    }
    let target = match opts.jump {
        None | Some(0) => return Ok(()),
        Some(-1)       => SeekFrom::End(0),
        Some(j) if j < 0 => SeekFrom::End(j),
        Some(j)        => SeekFrom::Start(j as u64),
    };
    let at = reader.seek(target)?;
    debug!("*** jumped to @{at} (0x{at:x})");
    Ok(())
}

/// Run the decoder and emitters for one record.  Decoder failures are
/// counted and reported inline; only output errors propagate.
fn dispatch<W: Write>(
    record:   &Record,
    registry: &TypeRegistry,
    verbose:  u8,
    stats:    &mut StreamStats,
    out:      &mut W,
) -> io::Result<()> {
    let rtype      = record.record_type();
    let descriptor = registry.lookup(rtype);

    match descriptor.and_then(|d| d.decoder.as_deref()) {
        Some(decoder) => match decoder.decode(record) {
            Ok(decoded) => {
                write_headline(out, record, registry, &decoded.summary)?;
                if verbose >= 1 {
                    for (name, value) in &decoded.fields {
                        writeln!(out, "    {name}: {value}")?;
                    }
                }
                let emitters = descriptor.map(|d| d.emitters.as_slice()).unwrap_or_default();
                for emitter in emitters {
                    if let Err(e) = emitter.emit(record, &decoded, out) {
                        decode_failed(out, record, registry, stats, &e)?;
                        break;
                    }
                }
            }
            Err(e) => {
                write_headline(out, record, registry, "")?;
                decode_failed(out, record, registry, stats, &e)?;
            }
        },
        None => {
            if descriptor.is_some() {
                stats.no_decoder += 1;
                if verbose >= 5 {
                    writeln!(out, "*** no decoder installed for rtype {rtype}, @{}", record.offset())?;
                }
            }
            write_headline(out, record, registry, "")?;
            if descriptor.is_none() && verbose >= 1 {
                writeln!(out, "    payload: {}", hex::encode(record.payload()))?;
            }
        }
    }

    if verbose >= 3 {
        writeln!(out)?;
        writeln!(out, "{}", describe(record.header(), record.offset(), registry))?;
        hex_dump(out, record.as_bytes())?;
    }
    if verbose >= 1 {
        writeln!(out)?;
    }
    Ok(())
}

fn decode_failed<W: Write>(
    out:      &mut W,
    record:   &Record,
    registry: &TypeRegistry,
    stats:    &mut StreamStats,
    err:      &dyn std::error::Error,
) -> io::Result<()> {
    stats.decoder_errors += 1;
    let rtype = record.record_type();
    writeln!(
        out,
        "*** decoder/emitter error: (len: {}, rtype: {} {}), @{}: {err}",
        record.len(),
        rtype,
        registry.name(rtype),
        record.offset(),
    )
}

/// `recnum systime (type) name -- summary`
fn write_headline<W: Write>(out: &mut W, record: &Record, registry: &TypeRegistry, summary: &str) -> io::Result<()> {
    let rtype = record.record_type();
    let line  = format!(
        "{:4} {:8} ({:2}) {:6} -- {}",
        record.record_number(),
        record.system_time(),
        rtype,
        registry.name(rtype),
        summary,
    );
    writeln!(out, "{}", line.trim_end())
}

fn hex_dump<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    for (row, chunk) in bytes.chunks(HEX_ROW).enumerate() {
        let quads: Vec<String> = chunk.chunks(4).map(hex::encode).collect();
        writeln!(out, "    {:04x}: {}", row * HEX_ROW, quads.join(" "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResyncFailure;
    use crate::fixture::StreamBuilder;
    use crate::registry::{DecodeError, Decoded, TypeDescriptor, DT_EVENT, DT_NOTE, DT_REBOOT, DT_SYNC, DT_TEST};
    use std::io::Cursor;

    fn run(bytes: Vec<u8>, registry: &TypeRegistry, opts: &DumpOptions) -> (DumpSummary, String) {
        let mut out = Vec::new();
        let src = SeekableSource::new(Cursor::new(bytes));
        let summary = dump(src, registry, opts, &CancelToken::new(), &mut out).unwrap();
        (summary, String::from_utf8(out).unwrap())
    }

    fn sample() -> Vec<u8> {
        let mut b = StreamBuilder::new();
        b.sync(1);
        b.record(DT_NOTE, 2, b"\x00\x00\xe6\x07\x03\x0e\x0c\x22\x38\x00hello\x00");
        b.record(DT_TEST, 3, &[1, 2, 3, 4]);
        b.sync(4);
        b.record(DT_NOTE, 5, b"\x00\x00\xe6\x07\x03\x0e\x0c\x22\x39\x00again\x00");
        b.into_bytes()
    }

    #[test]
    fn dumps_every_record_with_summary() {
        let reg = TypeRegistry::core();
        let (summary, text) = run(sample(), &reg, &DumpOptions::default());
        assert!(matches!(summary.stop, StopReason::EndOfStream));
        assert_eq!(summary.records_output, 5);
        assert_eq!(summary.stats().type_count(DT_SYNC), 2);
        assert!(text.starts_with(TITLE));
        assert!(text.contains("2022-03-14 12:34:56  hello"));
        assert!(text.contains("*** end of processing"));
    }

    #[test]
    fn filters_by_name_and_number() {
        let reg = TypeRegistry::core();
        let opts = DumpOptions { rtypes: vec!["note".into(), "22".into()], ..Default::default() };
        let (summary, text) = run(sample(), &reg, &opts);
        assert_eq!(summary.records_output, 3);
        assert_eq!(summary.stats().type_count(DT_SYNC), 0);
        assert!(!text.contains("SYNC   --"));
    }

    #[test]
    fn unknown_filter_name_is_rejected() {
        let reg = TypeRegistry::core();
        let opts = DumpOptions { rtypes: vec!["bogus".into()], ..Default::default() };
        let src = SeekableSource::new(Cursor::new(sample()));
        let res = dump(src, &reg, &opts, &CancelToken::new(), &mut Vec::new());
        assert!(matches!(res, Err(DumpError::UnknownType(t)) if t == "bogus"));
    }

    #[test]
    fn limit_and_record_window() {
        let reg = TypeRegistry::core();
        let opts = DumpOptions { limit: Some(2), ..Default::default() };
        let (summary, _) = run(sample(), &reg, &opts);
        assert!(matches!(summary.stop, StopReason::Limit));
        assert_eq!(summary.records_output, 2);

        let opts = DumpOptions { start_rec: Some(2), last_rec: Some(3), ..Default::default() };
        let (summary, _) = run(sample(), &reg, &opts);
        assert!(matches!(summary.stop, StopReason::LastRecord));
        assert_eq!(summary.records_output, 2);
    }

    #[test]
    fn end_position_stops_the_run() {
        let mut b = StreamBuilder::new();
        b.sync(1);
        let second = b.sync(2);
        b.sync(3);
        let reg = TypeRegistry::core();
        let opts = DumpOptions { end_pos: Some(second - 1), ..Default::default() };
        let (summary, _) = run(b.into_bytes(), &reg, &opts);
        assert!(matches!(summary.stop, StopReason::EndPosition));
        assert_eq!(summary.records_output, 1);
    }

    #[test]
    fn jump_and_directory_skip_position_the_reader() {
        let mut b = StreamBuilder::with_directory();
        b.sync(1);
        let second = b.sync(2);
        let bytes = b.into_bytes();
        let reg = TypeRegistry::core();

        let opts = DumpOptions { skip_directory: true, ..Default::default() };
        assert_eq!(run(bytes.clone(), &reg, &opts).0.records_output, 2);

        let opts = DumpOptions { jump: Some(second as i64), ..Default::default() };
        assert_eq!(run(bytes.clone(), &reg, &opts).0.records_output, 1);

        let opts = DumpOptions { jump: Some(-1), ..Default::default() };
        let (summary, _) = run(bytes.clone(), &reg, &opts);
        assert_eq!(summary.records_output, 0);
        assert_eq!(summary.report.end_offset, bytes.len() as u64);
    }

    #[test]
    fn decoder_failure_is_isolated() {
        let reg = TypeRegistry::builder()
            .register(DT_SYNC,   TypeDescriptor::new("SYNC", 36))
            .register(DT_REBOOT, TypeDescriptor::new("REBOOT", 128))
            .register(DT_NOTE,   TypeDescriptor::new("NOTE", 0).with_decoder(|_: &Record| {
                Err::<Decoded, _>(DecodeError::Malformed("broken".into()))
            }))
            .register(DT_TEST,   TypeDescriptor::new("TEST", 0))
            .build();
        let (summary, text) = run(sample(), &reg, &DumpOptions::default());
        assert_eq!(summary.records_output, 5);
        assert_eq!(summary.stats().decoder_errors, 2);
        assert_eq!(summary.stats().no_decoder, 3);
        assert_eq!(summary.stats().unknown_types, 0);
        assert!(text.contains("*** decoder/emitter error: (len: 34, rtype: 23 NOTE)"));
    }

    #[test]
    fn emitters_run_after_decoder() {
        let reg = TypeRegistry::builder()
            .register(DT_SYNC, TypeDescriptor::new("SYNC", 36).with_decoder(|r: &Record| {
                Ok::<_, DecodeError>(Decoded::new(format!("sync {}", r.record_number())))
            }))
            .register(DT_REBOOT, TypeDescriptor::new("REBOOT", 128))
            .add_emitter(DT_SYNC, |_: &Record, d: &Decoded, out: &mut dyn Write| -> Result<(), DecodeError> {
                writeln!(out, "EMIT {}", d.summary)?;
                Ok(())
            })
            .build();
        let mut b = StreamBuilder::new();
        b.sync(7);
        let (_, text) = run(b.into_bytes(), &reg, &DumpOptions::default());
        assert!(text.contains("sync 7\nEMIT sync 7\n"));
    }

    #[test]
    fn unknown_types_are_counted_and_shown() {
        let mut b = StreamBuilder::new();
        b.sync(1);
        b.record(200, 2, &[0xab, 0xcd]);
        let reg = TypeRegistry::core();
        let opts = DumpOptions { verbose: 1, ..Default::default() };
        let (summary, text) = run(b.into_bytes(), &reg, &opts);
        assert_eq!(summary.stats().unknown_types, 1);
        assert_eq!(summary.stats().no_decoder, 0);
        assert!(text.contains("payload: abcd"));
    }

    #[test]
    fn continuity_anomalies_are_printed() {
        let mut b = StreamBuilder::new();
        b.sync(50);
        b.sync(10);
        b.sync(14);
        let reg = TypeRegistry::core();
        let (summary, text) = run(b.into_bytes(), &reg, &DumpOptions::default());
        assert_eq!(summary.records_output, 3);
        assert!(text.contains("*** recnum went backwards.  last: 50, new: 10"));
        assert!(text.contains("*** record gap: (3) records"));
        assert_eq!(summary.stats().backward_jumps, 1);
    }

    #[test]
    fn verbose_three_dumps_hex() {
        let mut b = StreamBuilder::new();
        b.record(DT_EVENT, 1, &[0u8; 22]);
        let reg = TypeRegistry::core();
        let opts = DumpOptions { verbose: 3, ..Default::default() };
        let (_, text) = run(b.into_bytes(), &reg, &opts);
        assert!(text.contains("    0000: 28000400 01000000"));
        assert!(text.contains("    0020: "));
    }

    #[test]
    fn cancellation_is_checked_between_records() {
        let reg = TypeRegistry::core();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut out = Vec::new();
        let src = SeekableSource::new(Cursor::new(sample()));
        let summary = dump(src, &reg, &DumpOptions::default(), &cancel, &mut out).unwrap();
        assert!(matches!(summary.stop, StopReason::Cancelled));
        assert_eq!(summary.records_output, 0);
        assert!(String::from_utf8(out).unwrap().contains("*** user stop"));
    }

    #[test]
    fn fatal_resync_still_reports() {
        let mut b = StreamBuilder::new();
        b.sync(1);
        b.record(DT_NOTE, 0, b"");
        b.zeros(8192);
        let reg = TypeRegistry::core();
        let (summary, text) = run(b.into_bytes(), &reg, &DumpOptions::default());
        assert!(summary.is_failure());
        assert!(matches!(
            summary.stop,
            StopReason::Failed(FramingError::ResyncExhausted { reason: ResyncFailure::TooManyZeroWords(_), .. })
        ));
        assert_eq!(summary.records_output, 1);
        assert!(text.contains("resyncs: 1"));
    }

    #[derive(Default)]
    struct FlushCount {
        bytes:   Vec<u8>,
        flushes: usize,
    }

    impl Write for FlushCount {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn tail_runs_flush_every_record() {
        let reg = TypeRegistry::core();
        let run_with = |tail: bool| {
            let mut out = FlushCount::default();
            let src = SeekableSource::new(Cursor::new(sample()));
            let opts = DumpOptions { tail, ..Default::default() };
            let summary = dump(src, &reg, &opts, &CancelToken::new(), &mut out).unwrap();
            (summary.records_output, out.flushes)
        };
        // Title line plus one per record.
        assert_eq!(run_with(true), (5, 6));
        assert_eq!(run_with(false), (5, 0));
    }

    #[test]
    fn verbose_five_prints_version_banner() {
        let reg = TypeRegistry::core();
        let opts = DumpOptions { verbose: 5, ..Default::default() };
        let (_, text) = run(sample(), &reg, &opts);
        let banner = text.lines().next().unwrap();
        assert!(banner.starts_with(&format!("tagdump {}", env!("CARGO_PKG_VERSION"))));
        assert!(banner.contains(&format!("dt_h_revision: {DT_H_REVISION}")));
        assert!(text.contains(TITLE));

        let (_, quiet) = run(sample(), &reg, &DumpOptions { verbose: 4, ..Default::default() });
        assert!(quiet.starts_with(TITLE));
    }

    #[test]
    fn json_report() {
        let reg = TypeRegistry::core();
        let opts = DumpOptions { report: ReportFormat::Json, ..Default::default() };
        let (_, text) = run(sample(), &reg, &opts);
        let json_start = text.find('{').unwrap();
        let json: serde_json::Value = serde_json::from_str(&text[json_start..]).unwrap();
        assert_eq!(json["stats"]["total_records"], 5);
    }
}
