use std::collections::VecDeque;
use std::io;

/// An append-only byte queue with a consume pointer, fronting the helper's standard input.
///
/// Grounded on the teacher's own `Buffer::egress`, which writes a channel's outbound queue until
/// it drains or the socket would block. Simplified here from the teacher's `SliceDeque`-backed
/// chunk ring to a plain `VecDeque<u8>`: this queue only ever needs append-at-tail /
/// consume-at-head, not the unsafe fixed-capacity bookkeeping a high-throughput network buffer
/// needs, and the line-oriented commands this crate sends are tiny by comparison.
#[derive(Default)]
pub struct SendBuffer {
    data: VecDeque<u8>,
}

impl SendBuffer {
    pub fn new() -> SendBuffer {
        SendBuffer { data: VecDeque::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend(bytes.iter().copied());
    }

    /// Writes as much of the buffered data as possible to `writer`, consuming it from the head.
    /// Returns `Ok(true)` if the buffer fully drained, `Ok(false)` if the writer would block with
    /// data still queued.
    pub fn egress<W: io::Write>(&mut self, writer: &mut W) -> io::Result<bool> {
        while !self.data.is_empty() {
            let chunk = self.data.as_slices().0;
            match writer.write(chunk) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.data.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// A writer that accepts at most `cap` bytes per call before returning `WouldBlock`, mirroring
    /// the teacher's own `MockChannel` test double in `neutronium::net::buffer::tests`.
    struct MockWriter {
        sink: Vec<u8>,
        cap: usize,
        blocked: bool,
    }

    impl Write for MockWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.blocked {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.cap);
            self.sink.extend_from_slice(&buf[..n]);
            if n < buf.len() {
                self.blocked = true;
            }
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn egress_drains_fully_when_writer_accepts_everything() {
        let mut buffer = SendBuffer::new();
        buffer.append(b"open host 22\n");
        let mut writer = MockWriter { sink: Vec::new(), cap: 1024, blocked: false };
        let drained = buffer.egress(&mut writer).unwrap();
        assert!(drained);
        assert!(buffer.is_empty());
        assert_eq!(writer.sink, b"open host 22\n");
    }

    #[test]
    fn egress_stops_partway_and_retains_the_remainder() {
        let mut buffer = SendBuffer::new();
        buffer.append(b"abcdefgh");
        let mut writer = MockWriter { sink: Vec::new(), cap: 3, blocked: false };
        let drained = buffer.egress(&mut writer).unwrap();
        assert!(!drained);
        assert_eq!(writer.sink, b"abc");
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn egress_on_zero_write_is_an_error() {
        struct ZeroWriter;
        impl Write for ZeroWriter {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut buffer = SendBuffer::new();
        buffer.append(b"x");
        let mut writer = ZeroWriter;
        let err = buffer.egress(&mut writer).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
