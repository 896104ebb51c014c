use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use memchr::memchr;

use crate::common::{LedgerError, Result};

/// Initial line buffer size.
pub const INIT_BUFFER: usize = 64 * 1024;

/// Hard cap on one line (terminator included). A longer line fails the
/// parse with `LineTooLong`.
pub const MAX_LINE: usize = 1024 * 1024;

/// Whether the sink wants the parse to continue past the observed line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Receives complete lines (terminator included) as they are scanned.
pub trait LineSink {
    /// `offset` is the line's starting byte offset in the stream; `line_no`
    /// is 1-based. The buffer is only valid for the duration of the call.
    fn observe_line(&mut self, offset: u64, line_no: u64, line: &[u8]) -> Result<Flow>;
}

/// Cooperative cancellation flag, checked after each line and after each
/// buffer refill. Cloneable across threads.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        StopHandle::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clears the flag so a stopped parser can be resumed.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Single-pass byte scanner turning a readable stream into line events.
///
/// Maintains a growable buffer (64 KiB initial, 1 MiB cap), the running
/// end-of-line offset, and the running line number, so a parse can resume
/// mid-stream. A final partial line without a trailing `\n` is never
/// delivered: an unterminated tail is treated as still being written.
pub struct LineParser<R> {
    reader: R,
    buf: Vec<u8>,
    filled: usize,
    line_end_offset: u64,
    line_no: u64,
    stop: StopHandle,
}

impl<R: Read> LineParser<R> {
    pub fn new(reader: R) -> Self {
        Self::with_state(reader, 0, 0)
    }

    /// Resumption constructor. `line_end_offset` and `line_no` reflect the
    /// last line already consumed; the reader must be positioned at
    /// `line_end_offset`.
    pub fn with_state(reader: R, line_end_offset: u64, line_no: u64) -> Self {
        LineParser {
            reader,
            buf: vec![0u8; INIT_BUFFER],
            filled: 0,
            line_end_offset,
            line_no,
            stop: StopHandle::new(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// Adjusts the line-number bookkeeping. Must not be called while a
    /// parse is running; `&mut self` enforces that statically.
    pub fn set_line_no(&mut self, line_no: u64) {
        self.line_no = line_no;
    }

    pub fn line_end_offset(&self) -> u64 {
        self.line_end_offset
    }

    pub fn set_line_end_offset(&mut self, offset: u64) {
        self.line_end_offset = offset;
    }

    /// Scans the stream, dispatching each complete line to the sink.
    /// Returns on EOF, on `Flow::Stop`, or when the stop handle fires.
    pub fn parse<S: LineSink>(&mut self, sink: &mut S) -> Result<()> {
        loop {
            // Dispatch every complete line currently buffered.
            let mut pos = 0;
            while let Some(nl) = memchr(b'\n', &self.buf[pos..self.filled]) {
                let end = pos + nl + 1;
                let offset = self.line_end_offset;
                self.line_no += 1;
                self.line_end_offset += (end - pos) as u64;
                let flow = sink.observe_line(offset, self.line_no, &self.buf[pos..end])?;
                pos = end;
                if flow == Flow::Stop || self.stop.is_stopped() {
                    self.compact(pos);
                    return Ok(());
                }
            }
            self.compact(pos);

            // The residue holds no newline; grow if it fills the buffer.
            if self.filled == self.buf.len() {
                if self.buf.len() >= MAX_LINE {
                    return Err(LedgerError::LineTooLong {
                        line_no: self.line_no + 1,
                        offset: self.line_end_offset,
                        max: MAX_LINE,
                    });
                }
                let grown = (self.buf.len() * 2).min(MAX_LINE);
                self.buf.resize(grown, 0);
            }

            match self.reader.read(&mut self.buf[self.filled..]) {
                Ok(0) => return Ok(()), // EOF; partial tail not delivered
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            if self.stop.is_stopped() {
                return Ok(());
            }
        }
    }

    /// Drops the consumed prefix, keeping any partial line at the front.
    fn compact(&mut self, consumed: usize) {
        if consumed > 0 {
            self.buf.copy_within(consumed..self.filled, 0);
            self.filled -= consumed;
        }
    }
}
