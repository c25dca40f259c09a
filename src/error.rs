use std::fmt;
use std::io;
use thiserror::Error;

// ── Framing errors ───────────────────────────────────────────────────────────

/// Everything that can go wrong while turning bytes into records.
///
/// `InvalidLength`, `ZeroRecordNumber` and `ChecksumMismatch` are handled
/// inside the reader by resynchronizing; callers only ever see them from
/// [`decode_header`](crate::header::decode_header)-level helpers.  The
/// reader surfaces `EndOfStream` (terminal for this pull), and the fatal
/// `ResyncUnsupported`, `ResyncExhausted` and `Io` variants.
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("truncated input: wanted {wanted} bytes, got {got}")]
    TruncatedInput { wanted: usize, got: usize },

    #[error("end of stream @{offset} (0x{offset:x})")]
    EndOfStream { offset: u64 },

    #[error("invalid record length {length} @{offset} (0x{offset:x}){}", required_suffix(.required))]
    InvalidLength { length: u16, offset: u64, required: Option<u16> },

    #[error("zero record number @{offset} (0x{offset:x})")]
    ZeroRecordNumber { offset: u64 },

    #[error("checksum failure @{offset} (0x{offset:x}) [wanted: 0x{wanted:04x}, got: 0x{got:04x}]")]
    ChecksumMismatch { offset: u64, wanted: u16, got: u16 },

    /// SYNC or REBOOT has no registered length, a configuration defect.
    #[error("can not resync: sync or reboot record not defined")]
    ResyncUnsupported,

    #[error("resync failed @{offset} (0x{offset:x}): {reason}")]
    ResyncExhausted { offset: u64, reason: ResyncFailure },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FramingError {
    /// True for the signal that the source ran dry on a primary read.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, FramingError::EndOfStream { .. })
    }

    /// True when the read loop cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FramingError::ResyncUnsupported
                | FramingError::ResyncExhausted { .. }
                | FramingError::Io(_)
        )
    }
}

fn required_suffix(required: &Option<u16>) -> String {
    match required {
        Some(r) => format!(", type requires {r}"),
        None    => String::new(),
    }
}

/// Why a resynchronization scan gave up.
#[derive(Debug)]
pub enum ResyncFailure {
    /// More than the allowed number of consecutive zero quads.
    TooManyZeroWords(usize),
    /// A quad or header read came back short.
    ShortRead { wanted: usize, got: usize },
    /// The source had no bytes left.
    EndOfSource,
    Io(io::Error),
}

impl fmt::Display for ResyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResyncFailure::TooManyZeroWords(n) => write!(f, "too many zeros ({n} x 4), bailing"),
            ResyncFailure::ShortRead { wanted, got } => {
                write!(f, "short read, wanted {wanted}, got {got}")
            }
            ResyncFailure::EndOfSource => write!(f, "end of file"),
            ResyncFailure::Io(e) => write!(f, "file io error: {e}"),
        }
    }
}
