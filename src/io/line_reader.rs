//! Buffered line reader
//!
//! Turns an arbitrarily fragmented byte stream into complete lines:
//!
//! - Every chunk is normalized as it is read: `\r\n` and `\n\r` collapse to a
//!   single `\n`, a lone `\r` becomes `\n`. The last terminator seen is
//!   carried across reads so a pair split at a chunk boundary still counts
//!   once.
//! - A line fragment is accumulated across reads up to [`MAX_LINE_LEN`]
//!   bytes (implicit terminator included); growing past that is fatal.
//! - A stream that ends without a trailing terminator still delivers its
//!   last fragment as a final line before end of stream is reported.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read};
use std::ops::Deref;

use tracing::trace;

use crate::error::FatalError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum line length including the implicit terminator
pub const MAX_LINE_LEN: usize = 65536;

/// Size of one native read
pub const READ_CHUNK_SIZE: usize = 8192;

// ============================================================================
// Line
// ============================================================================

/// One complete line with its terminator stripped
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Line(Vec<u8>);

impl Line {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Decode as UTF-8, replacing invalid sequences
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl Deref for Line {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line({:?})", self.to_string_lossy())
    }
}

impl From<Vec<u8>> for Line {
    fn from(bytes: Vec<u8>) -> Self {
        Line(bytes)
    }
}

impl From<&str> for Line {
    fn from(s: &str) -> Self {
        Line(s.as_bytes().to_vec())
    }
}

impl PartialEq<str> for Line {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for Line {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

// ============================================================================
// Line Source Trait
// ============================================================================

/// A stream that yields normalized lines on demand
///
/// `load` may block; `getline` never does.
pub trait LineSource {
    /// Pull more bytes (or a completed line) from the underlying stream
    fn load(&mut self) -> Result<(), FatalError>;

    /// Return the next complete line, or `None` if no full line is buffered
    fn getline(&mut self) -> Result<Option<Line>, FatalError>;

    /// True once no more lines will ever be produced
    fn is_eof(&self) -> bool;

    /// Stop reading without draining; the source becomes terminal
    fn abandon(&mut self);

    /// Alternate `getline` and `load` until a line arrives or the stream ends
    fn getline_block(&mut self) -> Result<Option<Line>, FatalError> {
        while !self.is_eof() {
            if let Some(line) = self.getline()? {
                return Ok(Some(line));
            }
            self.load()?;
        }
        Ok(None)
    }
}

// ============================================================================
// Terminator Normalization
// ============================================================================

/// Collapses CR/LF variants to LF, carrying state across chunks
#[derive(Debug, Default, Clone)]
struct Normalizer {
    /// Terminator that may still pair with the next byte
    last: Option<u8>,
}

impl Normalizer {
    /// Normalize `chunk` in place and return the new length
    fn apply(&mut self, chunk: &mut [u8]) -> usize {
        let mut out = 0;
        for i in 0..chunk.len() {
            let ch = chunk[i];
            let paired = matches!(
                (self.last, ch),
                (Some(b'\r'), b'\n') | (Some(b'\n'), b'\r')
            );
            if paired {
                // The pair is consumed as a unit
                self.last = None;
                continue;
            }
            chunk[out] = if ch == b'\r' { b'\n' } else { ch };
            out += 1;
            self.last = matches!(ch, b'\r' | b'\n').then_some(ch);
        }
        out
    }
}

// ============================================================================
// Bounded Line Accumulator
// ============================================================================

#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, data: &[u8]) -> Result<(), FatalError> {
        if self.bytes.len() + data.len() + 1 > MAX_LINE_LEN {
            return Err(FatalError::LineOverrun {
                limit: MAX_LINE_LEN,
            });
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    fn take(&mut self) -> Line {
        Line(std::mem::take(&mut self.bytes))
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn clear(&mut self) {
        self.bytes.clear();
    }
}

// ============================================================================
// Line Reader
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Open,
    /// Native EOF observed, synthetic terminator buffered
    Draining,
    Eof,
    Abandoned,
    Poisoned,
}

/// Line reader over one input stream
///
/// Dropping a reader that has not reached end of stream is a contract
/// violation and panics; call [`LineSource::abandon`] to give up early.
pub struct LineReader<R> {
    inner: R,
    buf: Box<[u8]>,
    start: usize,
    end: usize,
    line: LineBuffer,
    normalizer: Normalizer,
    state: ReadState,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
            start: 0,
            end: 0,
            line: LineBuffer::default(),
            normalizer: Normalizer::default(),
            state: ReadState::Open,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Bytes read but not yet scanned by `getline`
    pub fn buffered(&self) -> usize {
        self.end - self.start
    }

    fn poison(&mut self, err: FatalError) -> FatalError {
        self.state = ReadState::Poisoned;
        err
    }
}

impl<R: Read> LineSource for LineReader<R> {
    /// Perform one native read
    ///
    /// Unscanned bytes are kept; if the window is already full the call
    /// returns without reading.
    fn load(&mut self) -> Result<(), FatalError> {
        match self.state {
            ReadState::Draining => {
                if self.start == self.end {
                    self.state = ReadState::Eof;
                }
                return Ok(());
            }
            ReadState::Eof | ReadState::Abandoned => return Ok(()),
            ReadState::Poisoned => return Err(FatalError::ReaderPoisoned),
            ReadState::Open => {}
        }

        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.end == self.buf.len() {
            return Ok(());
        }

        let n = loop {
            match self.inner.read(&mut self.buf[self.end..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.poison(FatalError::os("read", e))),
            }
        };

        if n == 0 {
            // A window ending in a terminator also flushes the accumulator
            let fragment = match self.buf[self.start..self.end].last() {
                Some(&last) => last != b'\n',
                None => !self.line.is_empty(),
            };
            if fragment {
                trace!("LineReader: end of stream, flushing final fragment");
                self.buf[self.end] = b'\n';
                self.end += 1;
                self.state = ReadState::Draining;
            } else if self.start == self.end {
                trace!("LineReader: end of stream");
                self.state = ReadState::Eof;
            } else {
                trace!("LineReader: end of stream, {} bytes left to scan", self.buffered());
                self.state = ReadState::Draining;
            }
            return Ok(());
        }

        let kept = self.normalizer.apply(&mut self.buf[self.end..self.end + n]);
        self.end += kept;
        trace!("LineReader: read {} bytes ({} after normalization)", n, kept);
        Ok(())
    }

    fn getline(&mut self) -> Result<Option<Line>, FatalError> {
        match self.state {
            ReadState::Eof | ReadState::Abandoned => return Ok(None),
            ReadState::Poisoned => return Err(FatalError::ReaderPoisoned),
            ReadState::Open | ReadState::Draining => {}
        }

        let window = &self.buf[self.start..self.end];
        match window.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if let Err(e) = self.line.extend(&window[..pos]) {
                    return Err(self.poison(e));
                }
                self.start += pos + 1;
                if self.start == self.end {
                    self.start = 0;
                    self.end = 0;
                }
                Ok(Some(self.line.take()))
            }
            None => {
                if let Err(e) = self.line.extend(window) {
                    return Err(self.poison(e));
                }
                self.start = 0;
                self.end = 0;
                Ok(None)
            }
        }
    }

    fn is_eof(&self) -> bool {
        matches!(self.state, ReadState::Eof | ReadState::Abandoned)
    }

    fn abandon(&mut self) {
        if !self.is_eof() {
            trace!(
                "LineReader: abandoned with {} buffered bytes",
                self.buffered()
            );
        }
        self.start = 0;
        self.end = 0;
        self.line.clear();
        self.state = ReadState::Abandoned;
    }
}

impl<R> Drop for LineReader<R> {
    fn drop(&mut self) {
        if matches!(self.state, ReadState::Open | ReadState::Draining)
            && !std::thread::panicking()
        {
            panic!("line reader dropped before end of stream");
        }
    }
}

impl<R> fmt::Debug for LineReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineReader")
            .field("state", &self.state)
            .field("buffered", &(self.end - self.start))
            .field("fragment", &self.line.bytes.len())
            .finish()
    }
}
