pub mod error;
pub mod header;
pub mod checksum;
pub mod record;
pub mod registry;
pub mod source;
pub mod recovery;
pub mod reader;
pub mod continuity;
pub mod stats;
pub mod dump;
pub mod fixture;

pub use error::{FramingError, ResyncFailure};
pub use header::{Header, HEADER_SIZE, RLEN_MAX};
pub use record::Record;
pub use registry::{Decoded, DecodeError, RecordDecoder, RecordEmitter, TypeDescriptor, TypeRegistry, TypeTable};
pub use source::{ByteSource, SeekableSource, TailSource};
pub use recovery::Resynchronizer;
pub use reader::{ReaderConfig, RecordReader};
pub use continuity::{Anomaly, ContinuityTracker};
pub use stats::{StatsReport, StreamStats};
pub use dump::{dump, CancelToken, DumpOptions, DumpSummary, StopReason};
