//! In-memory transport connections for tests and simulation.
//!
//! The writer can be told to fail after a number of bytes to exercise I/O
//! fault paths.

use std::{
    io::{self, Cursor, Read, Write},
    time::Duration,
};

use crate::{
    MAX_FRAME_LENGTH,
    error::TransportError,
    plugin::{TransportConnectionReader, TransportConnectionWriter},
};

/// Byte sink that can fail on demand.
#[derive(Debug, Default)]
struct LimitedSink {
    bytes: Vec<u8>,
    fail_after: Option<usize>,
}

impl Write for LimitedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(limit) = self.fail_after {
            let room = limit.saturating_sub(self.bytes.len());
            if room == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure"));
            }
            let n = room.min(buf.len());
            self.bytes.extend_from_slice(&buf[..n]);
            return Ok(n);
        }
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer collecting connection bytes in memory.
#[derive(Debug)]
pub struct MemoryTransportWriter {
    sink: LimitedSink,
    capacity: u64,
    max_frame_length: usize,
    max_latency: Duration,
    disposed: Option<bool>,
}

impl MemoryTransportWriter {
    /// Writer advertising `capacity` bytes and the maximum frame length.
    pub fn new(capacity: u64) -> Self {
        Self {
            sink: LimitedSink::default(),
            capacity,
            max_frame_length: MAX_FRAME_LENGTH,
            max_latency: Duration::from_secs(60),
            disposed: None,
        }
    }

    /// Advertise a smaller frame length.
    #[must_use]
    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    /// Fail every write once `limit` bytes have been accepted.
    #[must_use]
    pub fn failing_after(mut self, limit: usize) -> Self {
        self.sink.fail_after = Some(limit);
        self
    }

    /// Bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.sink.bytes
    }

    /// Take the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.sink.bytes
    }

    /// `Some(exception)` once disposed.
    pub fn disposed(&self) -> Option<bool> {
        self.disposed
    }
}

impl TransportConnectionWriter for MemoryTransportWriter {
    fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    fn max_latency(&self) -> Duration {
        self.max_latency
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn output(&mut self) -> &mut dyn Write {
        &mut self.sink
    }

    fn dispose(&mut self, exception: bool) -> Result<(), TransportError> {
        self.disposed.get_or_insert(exception);
        Ok(())
    }
}

/// Reader over a byte buffer.
#[derive(Debug)]
pub struct MemoryTransportReader {
    input: Cursor<Vec<u8>>,
    max_frame_length: usize,
    disposed: Option<(bool, bool)>,
}

impl MemoryTransportReader {
    /// Reader delivering `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { input: Cursor::new(bytes), max_frame_length: MAX_FRAME_LENGTH, disposed: None }
    }

    /// `Some((exception, recognised))` once disposed.
    pub fn disposed(&self) -> Option<(bool, bool)> {
        self.disposed
    }
}

impl TransportConnectionReader for MemoryTransportReader {
    fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    fn input(&mut self) -> &mut dyn Read {
        &mut self.input
    }

    fn dispose(&mut self, exception: bool, recognised: bool) -> Result<(), TransportError> {
        self.disposed.get_or_insert((exception, recognised));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_collects_bytes() {
        let mut writer = MemoryTransportWriter::new(100);
        writer.output().write_all(b"abc").unwrap();
        assert_eq!(writer.bytes(), b"abc");
        assert_eq!(writer.disposed(), None);

        writer.dispose(false).unwrap();
        writer.dispose(true).unwrap();
        assert_eq!(writer.disposed(), Some(false));
    }

    #[test]
    fn writer_failure_injection() {
        let mut writer = MemoryTransportWriter::new(100).failing_after(2);
        let err = writer.output().write_all(b"abc").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(writer.bytes(), b"ab");
    }

    #[test]
    fn reader_delivers_bytes() {
        let mut reader = MemoryTransportReader::new(b"xyz".to_vec());
        let mut out = Vec::new();
        reader.input().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"xyz");

        reader.dispose(false, true).unwrap();
        assert_eq!(reader.disposed(), Some((false, true)));
    }
}
