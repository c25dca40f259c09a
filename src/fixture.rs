//! Synthetic stream builder for tests, benches and reproductions.
//!
//! Records are laid down exactly as the device does: sealed checksum, then
//! zero pad bytes up to the next quad boundary.

use crate::checksum::seal;
use crate::header::{align_up, encode_header, Header, DBLK_DIR_SIZE, DT_H_REVISION, HEADER_SIZE, SYNC_MAJIK, SYNC_MAJIK_OFFSET};
use crate::registry::{DT_REBOOT, DT_SYNC, REBOOT_RECORD_LEN, SYNC_RECORD_LEN};

#[derive(Debug, Clone, Default)]
pub struct StreamBuilder {
    bytes:       Vec<u8>,
    system_time: u64,
    last_sync:   u32,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a zeroed directory sector, as on the device.
    pub fn with_directory() -> Self {
        Self { bytes: vec![0u8; DBLK_DIR_SIZE as usize], ..Self::default() }
    }

    /// Offset the next record will start at.
    pub fn offset(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Append a sealed record; returns its offset.
    pub fn record(&mut self, record_type: u16, record_number: u32, payload: &[u8]) -> u64 {
        let len = HEADER_SIZE + payload.len();
        let header = Header {
            record_length: len as u16,
            record_type,
            record_number,
            system_time: self.system_time,
            checksum: 0,
        };
        self.system_time += 1024;
        let mut rec = encode_header(&header).to_vec();
        rec.extend_from_slice(payload);
        seal(&mut rec);
        self.push_record(&rec)
    }

    pub fn sync(&mut self, record_number: u32) -> u64 {
        let payload = self.sync_payload(SYNC_RECORD_LEN as usize);
        let at = self.record(DT_SYNC, record_number, &payload);
        self.last_sync = at as u32;
        at
    }

    pub fn reboot(&mut self, record_number: u32) -> u64 {
        let mut payload = self.sync_payload(REBOOT_RECORD_LEN as usize);
        payload[36 - HEADER_SIZE..40 - HEADER_SIZE].copy_from_slice(&DT_H_REVISION.to_le_bytes());
        let at = self.record(DT_REBOOT, record_number, &payload);
        self.last_sync = at as u32;
        at
    }

    /// Append bytes verbatim, no alignment.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn zeros(&mut self, n: usize) -> &mut Self {
        self.bytes.resize(self.bytes.len() + n, 0);
        self
    }

    /// Mutable view for corrupting already written bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn sync_payload(&self, record_len: usize) -> Vec<u8> {
        let mut payload = vec![0u8; record_len - HEADER_SIZE];
        let prev = 28 - HEADER_SIZE;
        payload[prev..prev + 4].copy_from_slice(&self.last_sync.to_le_bytes());
        let majik = SYNC_MAJIK_OFFSET - HEADER_SIZE;
        payload[majik..majik + 4].copy_from_slice(&SYNC_MAJIK.to_le_bytes());
        payload
    }

    fn push_record(&mut self, rec: &[u8]) -> u64 {
        let at = align_up(self.bytes.len() as u64);
        self.bytes.resize(at as usize, 0);
        self.bytes.extend_from_slice(rec);
        let end = align_up(self.bytes.len() as u64) as usize;
        self.bytes.resize(end, 0);
        at
    }
}
