use crate::header::{Header, HEADER_SIZE};

/// One validated record: header, payload and the stream offset it came from.
///
/// Only the record reader constructs these, after every framing check has
/// passed.  The contents are read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    offset: u64,
    header: Header,
    bytes:  Vec<u8>,
}

impl Record {
    /// `bytes` is the whole record, header included.
    pub(crate) fn new(offset: u64, header: Header, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), header.record_length as usize);
        Self { offset, header, bytes }
    }

    pub fn offset(&self)        -> u64     { self.offset }
    pub fn header(&self)        -> &Header { &self.header }
    pub fn record_type(&self)   -> u16     { self.header.record_type }
    pub fn record_number(&self) -> u32     { self.header.record_number }
    pub fn system_time(&self)   -> u64     { self.header.system_time }
    pub fn len(&self)           -> usize   { self.bytes.len() }

    /// Always false: a record carries at least its header.
    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }

    /// Bytes following the header.
    pub fn payload(&self) -> &[u8] { &self.bytes[HEADER_SIZE..] }

    /// The full record as it sits in the stream.
    pub fn as_bytes(&self) -> &[u8] { &self.bytes }
}
