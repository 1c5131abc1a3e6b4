use std::io::{self, ErrorKind, Write};

use bytes::{Buf, Bytes};

/// Result of one non-blocking I/O attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoProgress {
    /// The operation moved bytes; the socket may still be ready.
    Ready,
    /// The socket reported `WouldBlock`; wait for the next readiness event.
    WouldBlock,
}

/// The in-flight blob of a response being drained to the socket.
#[derive(Debug)]
pub struct ResponseWriter {
    sending: Bytes,
    written: usize,
}

impl ResponseWriter {
    pub fn new(sending: Bytes) -> Self {
        Self {
            sending,
            written: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.sending.len()
    }

    pub fn is_done(&self) -> bool {
        self.sending.is_empty()
    }

    /// Total bytes accepted by the socket so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Sends at most `max_chunk` bytes from the front of the blob and trims
    /// whatever the socket accepted.
    pub fn write_chunk<W: Write>(&mut self, stream: &mut W, max_chunk: usize) -> io::Result<IoProgress> {
        let end = self.sending.len().min(max_chunk);

        let n = match stream.write(&self.sending[..end]) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(IoProgress::WouldBlock),
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(IoProgress::Ready),
            Err(e) => return Err(e),
        };

        if n == 0 && end > 0 {
            return Err(io::Error::new(
                ErrorKind::WriteZero,
                "connection closed while writing",
            ));
        }

        self.sending.advance(n);
        self.written += n;

        tracing::trace!(sent = n, remaining = self.sending.len(), "partial send");
        Ok(IoProgress::Ready)
    }
}
