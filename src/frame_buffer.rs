use std::io::{self, Write};

/// Growable byte accumulator holding one encoded frame.
///
/// The allocation is kept across frames; [`FrameBuffer::flush_to`] empties the
/// buffer whether or not the write succeeds.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    bytes: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pair of buffers for double-buffered encode/flush.
    pub fn pair() -> [Self; 2] {
        [Self::new(), Self::new()]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Writes the whole buffer to `out`, then empties it.
    pub fn flush_to<W: Write + ?Sized>(&mut self, out: &mut W) -> io::Result<()> {
        let result = out.write_all(&self.bytes).and_then(|()| out.flush());
        self.bytes.clear();
        result
    }
}

impl Write for FrameBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.bytes.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Write};

    use super::FrameBuffer;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn flush_writes_everything_and_keeps_capacity() {
        let mut buffer = FrameBuffer::new();
        buffer.write_all(b"\x1b[41m \x1b[0m\n").unwrap();
        let capacity = buffer.capacity();

        let mut out = Vec::new();
        buffer.flush_to(&mut out).unwrap();
        assert_eq!(out, b"\x1b[41m \x1b[0m\n");
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), capacity);
    }

    #[test]
    fn failed_flush_still_empties_buffer() {
        let mut buffer = FrameBuffer::new();
        buffer.write_all(b"frame").unwrap();
        let error = buffer.flush_to(&mut BrokenPipe).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
        assert!(buffer.is_empty());
    }
}
