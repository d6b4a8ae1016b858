use std::io::{self, Write};

/// Outcome of a [`WriteBuffer::drain`] attempt.
#[derive(Debug)]
pub enum Drain {
    /// Everything queued was written; the buffer is empty.
    Flushed,

    /// Some bytes were written before the socket would block; the rest
    /// stays queued.
    Partial(usize),

    /// The socket would block before accepting anything.
    Blocked,

    /// The socket reported an error other than would-block.
    Failed(io::Error),
}

/// Bytes waiting to be written to one socket.
///
/// Bytes are appended at the tail and removed from the head exactly as far
/// as the socket accepted them, so a short write never loses or repeats
/// data.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    bytes: Vec<u8>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` to the queue.
    ///
    /// Returns `true` if the buffer was empty before, i.e. write interest
    /// needs to be armed.
    pub fn enqueue(&mut self, bytes: &[u8]) -> bool {
        let was_empty = self.bytes.is_empty();
        self.bytes.extend_from_slice(bytes);
        was_empty && !bytes.is_empty()
    }

    /// Writes as much of the queue as `writer` accepts.
    pub fn drain<W: Write>(&mut self, writer: &mut W) -> Drain {
        let mut written = 0;

        while !self.bytes.is_empty() {
            match writer.write(&self.bytes) {
                Ok(0) => {
                    return Drain::Failed(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted zero bytes",
                    ));
                }
                Ok(n) => {
                    self.bytes.drain(..n);
                    written += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return if written > 0 {
                        Drain::Partial(written)
                    } else {
                        Drain::Blocked
                    };
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Drain::Failed(err),
            }
        }

        Drain::Flushed
    }

    /// Moves every queued byte out, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Socket stand-in that accepts a fixed number of bytes per call and
    /// then reports would-block.
    pub(crate) struct Throttled {
        pub(crate) accepted: Vec<u8>,
        pub(crate) budget: usize,
        pub(crate) chunk: usize,
        pub(crate) fail: Option<io::ErrorKind>,
    }

    impl Throttled {
        pub(crate) fn new(budget: usize, chunk: usize) -> Self {
            Self {
                accepted: Vec::new(),
                budget,
                chunk,
                fail: None,
            }
        }
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.fail {
                return Err(kind.into());
            }
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let n = buf.len().min(self.budget).min(self.chunk);
            self.accepted.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn enqueue_reports_when_interest_must_be_armed() {
        let mut buffer = WriteBuffer::new();

        assert!(!buffer.enqueue(b""));
        assert!(buffer.enqueue(b"abc"));
        assert!(!buffer.enqueue(b"def"));
        assert_eq!(buffer.as_slice(), b"abcdef");
    }

    #[test]
    fn full_drain_empties_buffer() {
        let mut buffer = WriteBuffer::new();
        let mut sink = Throttled::new(usize::MAX, 2);
        buffer.enqueue(b"hello world");

        assert!(matches!(buffer.drain(&mut sink), Drain::Flushed));
        assert!(buffer.is_empty());
        assert_eq!(sink.accepted, b"hello world");
    }

    #[test]
    fn partial_write_resumes_without_loss_or_duplication() {
        let mut buffer = WriteBuffer::new();
        let mut sink = Throttled::new(4, 3);
        buffer.enqueue(b"0123456789");

        assert!(matches!(buffer.drain(&mut sink), Drain::Partial(4)));
        assert_eq!(buffer.as_slice(), b"456789");

        buffer.enqueue(b"ab");
        sink.budget = usize::MAX;

        assert!(matches!(buffer.drain(&mut sink), Drain::Flushed));
        assert_eq!(sink.accepted, b"0123456789ab");
    }

    #[test]
    fn would_block_removes_nothing() {
        let mut buffer = WriteBuffer::new();
        let mut sink = Throttled::new(0, 8);
        buffer.enqueue(b"queued");

        assert!(matches!(buffer.drain(&mut sink), Drain::Blocked));
        assert_eq!(buffer.as_slice(), b"queued");
    }

    #[test]
    fn hard_error_is_reported() {
        let mut buffer = WriteBuffer::new();
        let mut sink = Throttled::new(8, 8);
        sink.fail = Some(io::ErrorKind::BrokenPipe);
        buffer.enqueue(b"x");

        match buffer.drain(&mut sink) {
            Drain::Failed(err) => assert_eq!(err.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn take_moves_bytes_out() {
        let mut buffer = WriteBuffer::new();
        buffer.enqueue(b"early");

        assert_eq!(buffer.take(), b"early");
        assert!(buffer.is_empty());
    }
}
