//! Byte sources the record reader pulls from.
//!
//! # Contract
//! A [`ByteSource`] is a seek/read/tell capability.  `read` may return fewer
//! bytes than asked for near the end of the data; the reader treats a short
//! read as "nothing more right now", never as a framing error.
//!
//! # Tail mode
//! [`TailSource`] follows a file that the device (or a copier) is still
//! appending to.  A read at end-of-file sleeps and polls for growth instead of
//! returning short.  With an `idle_timeout` it gives up after that long
//! without new bytes and reports the short read, so the read loop can end.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::dump::CancelToken;

/// Default polling period for [`TailSource`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub trait ByteSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Read up to `buf.len()` bytes.  Returns 0 only when no bytes are
    /// available.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn tell(&mut self) -> io::Result<u64>;

    /// True when reads past the current end block for more data.
    fn supports_tail(&self) -> bool {
        false
    }

    /// Read until `buf` is full or the source reports no more bytes.
    /// Returns the number of bytes placed in `buf`.
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> { (**self).seek(pos) }
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { (**self).read(buf) }
    fn tell(&mut self) -> io::Result<u64> { (**self).tell() }
    fn supports_tail(&self) -> bool { (**self).supports_tail() }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> { (**self).seek(pos) }
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { (**self).read(buf) }
    fn tell(&mut self) -> io::Result<u64> { (**self).tell() }
    fn supports_tail(&self) -> bool { (**self).supports_tail() }
}

// ── Seekable source ──────────────────────────────────────────────────────────

/// Any `Read + Seek` (files, `Cursor<Vec<u8>>`, ...) as a [`ByteSource`].
pub struct SeekableSource<R: Read + Seek> {
    inner: R,
}

impl<R: Read + Seek> SeekableSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl SeekableSource<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read + Seek> ByteSource for SeekableSource<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn tell(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }
}

// ── Tail source ──────────────────────────────────────────────────────────────

pub struct TailSource {
    file:          File,
    poll_interval: Duration,
    idle_timeout:  Option<Duration>,
    cancel:        Option<CancelToken>,
}

impl TailSource {
    pub fn new(file: File) -> Self {
        Self {
            file,
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_timeout:  None,
            cancel:        None,
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(File::open(path)?))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Give up waiting after `timeout` without new data.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Stop waiting as soon as `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl ByteSource for TailSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();
        loop {
            let n = self.file.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return Ok(0);
            }
            if self.idle_timeout.is_some_and(|t| started.elapsed() >= t) {
                return Ok(0);
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn tell(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }

    fn supports_tail(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    /// Hands out at most 3 bytes per read, like a pipe or socket would.
    struct Dribble(Cursor<Vec<u8>>);

    impl ByteSource for Dribble {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> { self.0.seek(pos) }
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.0.read(&mut buf[..n])
        }
        fn tell(&mut self) -> io::Result<u64> { Ok(self.0.position()) }
    }

    #[test]
    fn read_full_gathers_short_reads() {
        let mut src = Dribble(Cursor::new((0u8..20).collect()));
        let mut buf = [0u8; 16];
        assert_eq!(src.read_full(&mut buf).unwrap(), 16);
        assert_eq!(buf[15], 15);
        assert_eq!(src.read_full(&mut buf).unwrap(), 4);
    }

    #[test]
    fn seekable_tell_tracks_position() {
        let mut src = SeekableSource::new(Cursor::new(vec![0u8; 64]));
        src.seek(SeekFrom::Start(10)).unwrap();
        let mut buf = [0u8; 6];
        src.read_full(&mut buf).unwrap();
        assert_eq!(src.tell().unwrap(), 16);
        assert!(!src.supports_tail());
    }

    #[test]
    fn tail_times_out_without_growth() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abcd").unwrap();
        tmp.flush().unwrap();

        let mut src = TailSource::open(tmp.path())
            .unwrap()
            .with_poll_interval(Duration::from_millis(5))
            .with_idle_timeout(Duration::from_millis(30));
        assert!(src.supports_tail());

        let mut buf = [0u8; 8];
        assert_eq!(src.read_full(&mut buf).unwrap(), 4);
        assert_eq!(src.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn tail_picks_up_appended_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"ab").unwrap();
        tmp.flush().unwrap();

        let mut src = TailSource::open(tmp.path())
            .unwrap()
            .with_poll_interval(Duration::from_millis(5))
            .with_idle_timeout(Duration::from_secs(5));
        let mut buf = [0u8; 2];
        assert_eq!(src.read_full(&mut buf).unwrap(), 2);

        let mut writer = tmp.reopen().unwrap();
        writer.seek(SeekFrom::End(0)).unwrap();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.write_all(b"cd").unwrap();
            writer.flush().unwrap();
        });

        assert_eq!(src.read_full(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"cd");
        handle.join().unwrap();
    }
}
