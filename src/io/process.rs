//! Child process channel
//!
//! A [`ProcessChannel`] owns one spawned child with all three standard
//! streams redirected: a raw write side for stdin and one line source per
//! output stream. Each output stream also carries the per-stream state the
//! [`Selector`](crate::io::Selector) needs: a pending-line slot filled
//! during a wait cycle and a flag recording that end of stream was already
//! reported.

use std::cell::{RefCell, RefMut};
use std::ffi::OsStr;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::error::FatalError;
use crate::io::backend::{Backend, PlatformBackend};
use crate::io::line_reader::{Line, LineSource};

// ============================================================================
// Child Output Pipes
// ============================================================================

/// Which output stream of a child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Stdout, StreamKind::Stderr];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read end of one of a child's output pipes
#[derive(Debug)]
pub enum ChildPipe {
    Stdout(ChildStdout),
    Stderr(ChildStderr),
}

impl ChildPipe {
    pub fn kind(&self) -> StreamKind {
        match self {
            ChildPipe::Stdout(_) => StreamKind::Stdout,
            ChildPipe::Stderr(_) => StreamKind::Stderr,
        }
    }
}

impl Read for ChildPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ChildPipe::Stdout(pipe) => pipe.read(buf),
            ChildPipe::Stderr(pipe) => pipe.read(buf),
        }
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for ChildPipe {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        match self {
            ChildPipe::Stdout(pipe) => pipe.as_raw_fd(),
            ChildPipe::Stderr(pipe) => pipe.as_raw_fd(),
        }
    }
}

impl fmt::Display for ChildPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind(), f)
    }
}

// ============================================================================
// Per-Stream State
// ============================================================================

/// Line source plus the selector bookkeeping for one output stream
#[derive(Debug)]
pub(crate) struct StreamSlot<S> {
    pub(crate) reader: S,
    /// Line extracted during the last wait cycle, not yet handed out
    pub(crate) pending: Option<Line>,
    /// End of stream has been reported to the caller
    pub(crate) done: bool,
}

impl<S: LineSource> StreamSlot<S> {
    fn new(reader: S) -> Self {
        Self {
            reader,
            pending: None,
            done: false,
        }
    }

    fn getline(&mut self) -> Result<Option<Line>, FatalError> {
        match self.pending.take() {
            Some(line) => Ok(Some(line)),
            None => self.reader.getline(),
        }
    }

    fn getline_block(&mut self) -> Result<Option<Line>, FatalError> {
        match self.pending.take() {
            Some(line) => Ok(Some(line)),
            None => self.reader.getline_block(),
        }
    }
}

// ============================================================================
// Process Channel
// ============================================================================

struct ChannelInner<B: Backend> {
    program: String,
    child: Child,
    stdin: RefCell<Option<ChildStdin>>,
    out: RefCell<StreamSlot<B::Stream>>,
    err: RefCell<StreamSlot<B::Stream>>,
    reaped: bool,
}

impl<B: Backend> ChannelInner<B> {
    fn slot(&self, kind: StreamKind) -> &RefCell<StreamSlot<B::Stream>> {
        match kind {
            StreamKind::Stdout => &self.out,
            StreamKind::Stderr => &self.err,
        }
    }
}

impl<B: Backend> Drop for ChannelInner<B> {
    fn drop(&mut self) {
        if !self.reaped {
            warn!(
                "ProcessChannel: {} (pid {}) dropped without close(), killing",
                self.program,
                self.child.id()
            );
            self.stdin.get_mut().take();
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        for slot in [self.out.get_mut(), self.err.get_mut()] {
            if !slot.reader.is_eof() {
                slot.reader.abandon();
            }
        }
    }
}

/// A spawned child process with line-oriented access to its output
///
/// A default-constructed or fully closed channel is inert: it reports
/// [`is_closed`](Self::is_closed) and every I/O operation fails with
/// [`FatalError::ChannelClosed`].
pub struct ProcessChannel<B: Backend = PlatformBackend> {
    inner: Option<ChannelInner<B>>,
}

impl<B: Backend> ProcessChannel<B> {
    /// Spawn `path` with all three standard streams redirected
    ///
    /// `argv[0]` becomes the child's program name where the platform allows
    /// it; the remaining elements are passed as arguments.
    pub fn open<S: AsRef<OsStr>>(path: impl AsRef<Path>, argv: &[S]) -> Result<Self, FatalError> {
        let path = path.as_ref();
        let program = path.display().to_string();
        let (arg0, args) = argv.split_first().ok_or_else(|| {
            FatalError::InvalidArgument(format!("empty argument vector for {program}"))
        })?;

        let shown: Vec<&OsStr> = argv.iter().map(AsRef::as_ref).collect();
        info!("ProcessChannel: starting {} {:?}", program, shown);

        let mut command = Command::new(path);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.arg0(arg0);
        }
        #[cfg(not(unix))]
        let _ = arg0;

        let mut child = command.spawn().map_err(|source| FatalError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdin = child.stdin.take();
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            reap(&mut child);
            return Err(FatalError::os("pipe", io::Error::other("child stream not captured")));
        };

        let out = match B::attach(ChildPipe::Stdout(stdout)) {
            Ok(stream) => stream,
            Err(e) => {
                reap(&mut child);
                return Err(e);
            }
        };
        let err = match B::attach(ChildPipe::Stderr(stderr)) {
            Ok(stream) => stream,
            Err(e) => {
                reap(&mut child);
                let mut out = out;
                out.abandon();
                return Err(e);
            }
        };

        debug!(
            "ProcessChannel: {} started with pid {} ({} backend)",
            program,
            child.id(),
            B::NAME
        );

        Ok(Self {
            inner: Some(ChannelInner {
                program,
                child,
                stdin: RefCell::new(stdin),
                out: RefCell::new(StreamSlot::new(out)),
                err: RefCell::new(StreamSlot::new(err)),
                reaped: false,
            }),
        })
    }

    fn inner(&self) -> Result<&ChannelInner<B>, FatalError> {
        self.inner.as_ref().ok_or(FatalError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.as_ref().map(|inner| inner.child.id())
    }

    pub fn program(&self) -> Option<&str> {
        self.inner.as_ref().map(|inner| inner.program.as_str())
    }

    /// Single best-effort write to the child's stdin
    ///
    /// Returns the number of bytes accepted, which may be fewer than
    /// `buf.len()`.
    pub fn write(&self, buf: &[u8]) -> Result<usize, FatalError> {
        let inner = self.inner()?;
        let mut stdin = inner.stdin.borrow_mut();
        let pipe = stdin.as_mut().ok_or(FatalError::WriteClosed)?;
        loop {
            match pipe.write(buf) {
                Ok(n) => {
                    trace!("ProcessChannel: wrote {} of {} bytes", n, buf.len());
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FatalError::os("write", e)),
            }
        }
    }

    /// Write the whole buffer, looping over [`write`](Self::write)
    pub fn write_all(&self, mut buf: &[u8]) -> Result<(), FatalError> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(FatalError::os("write", io::ErrorKind::WriteZero.into()));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Close stdin only, leaving both output streams open
    ///
    /// Idempotent; a no-op on an inert channel.
    pub fn close_write(&self) {
        if let Some(inner) = &self.inner {
            if inner.stdin.borrow_mut().take().is_some() {
                debug!("ProcessChannel: closed stdin of pid {}", inner.child.id());
            }
        }
    }

    /// Close stdin, drain both output streams, then wait for the child
    ///
    /// Lines still buffered are discarded. Returns the exit status, or
    /// `None` if the channel was already inert.
    pub fn close(&mut self) -> Result<Option<ExitStatus>, FatalError> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(None);
        };

        inner.stdin.get_mut().take();
        for kind in StreamKind::ALL {
            let slot = inner.slot(kind);
            let mut slot = slot.borrow_mut();
            let mut discarded = usize::from(slot.pending.take().is_some());
            while slot.reader.getline_block()?.is_some() {
                discarded += 1;
            }
            if discarded > 0 {
                trace!("ProcessChannel: discarded {} {} lines on close", discarded, kind);
            }
        }

        let status = inner
            .child
            .wait()
            .map_err(|e| FatalError::os("waitpid", e))?;
        inner.reaped = true;
        debug!(
            "ProcessChannel: {} (pid {}) exited with {}",
            inner.program,
            inner.child.id(),
            status
        );
        Ok(Some(status))
    }

    /// Next line of `kind` if one is already buffered; never blocks
    pub fn getline(&self, kind: StreamKind) -> Result<Option<Line>, FatalError> {
        self.inner()?.slot(kind).borrow_mut().getline()
    }

    /// Next line of `kind`, blocking until one arrives or the stream ends
    pub fn getline_block(&self, kind: StreamKind) -> Result<Option<Line>, FatalError> {
        self.inner()?.slot(kind).borrow_mut().getline_block()
    }

    pub fn getline_in(&self) -> Result<Option<Line>, FatalError> {
        self.getline(StreamKind::Stdout)
    }

    pub fn getline_err(&self) -> Result<Option<Line>, FatalError> {
        self.getline(StreamKind::Stderr)
    }

    pub fn getline_in_block(&self) -> Result<Option<Line>, FatalError> {
        self.getline_block(StreamKind::Stdout)
    }

    pub fn getline_err_block(&self) -> Result<Option<Line>, FatalError> {
        self.getline_block(StreamKind::Stderr)
    }

    /// Whether `kind` will produce no further lines; true for an inert channel
    pub fn is_eof(&self, kind: StreamKind) -> bool {
        match &self.inner {
            Some(inner) => {
                let slot = inner.slot(kind).borrow();
                slot.pending.is_none() && slot.reader.is_eof()
            }
            None => true,
        }
    }

    /// Selector access to one stream's state; `None` for an inert channel
    pub(crate) fn slot(&self, kind: StreamKind) -> Option<RefMut<'_, StreamSlot<B::Stream>>> {
        self.inner
            .as_ref()
            .map(|inner| inner.slot(kind).borrow_mut())
    }
}

/// Kill and reap a child whose setup failed half-way
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl<B: Backend> Default for ProcessChannel<B> {
    fn default() -> Self {
        Self { inner: None }
    }
}

impl<B: Backend> fmt::Debug for ProcessChannel<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("ProcessChannel")
                .field("program", &inner.program)
                .field("pid", &inner.child.id())
                .field("backend", &B::NAME)
                .finish(),
            None => f.write_str("ProcessChannel(closed)"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::io::backend::{PollBackend, ThreadBackend};
    use crate::test_utils::sh;

    fn lines_then_eof<B: Backend>() {
        let mut channel = sh::<B>("printf 'abc\\r\\n'; sleep 0.05; printf def");
        assert_eq!(channel.getline_in_block().unwrap().unwrap(), "abc");
        assert_eq!(channel.getline_in_block().unwrap().unwrap(), "def");
        assert_eq!(channel.getline_in_block().unwrap(), None);
        assert!(channel.is_eof(StreamKind::Stdout));
        assert!(channel.close().unwrap().unwrap().success());
    }

    #[test]
    fn test_lines_then_eof_poll() {
        lines_then_eof::<PollBackend>();
    }

    #[test]
    fn test_lines_then_eof_thread() {
        lines_then_eof::<ThreadBackend>();
    }

    fn echo_through_stdin<B: Backend>() {
        let mut channel = sh::<B>("while read l; do echo \"got $l\"; echo \"err $l\" >&2; done");
        channel.write_all(b"one\ntwo\n").unwrap();
        channel.close_write();
        channel.close_write();
        assert!(matches!(channel.write(b"x"), Err(FatalError::WriteClosed)));

        assert_eq!(channel.getline_in_block().unwrap().unwrap(), "got one");
        assert_eq!(channel.getline_in_block().unwrap().unwrap(), "got two");
        assert_eq!(channel.getline_err_block().unwrap().unwrap(), "err one");
        assert_eq!(channel.getline_err_block().unwrap().unwrap(), "err two");
        assert_eq!(channel.getline_in_block().unwrap(), None);
        assert_eq!(channel.getline_err_block().unwrap(), None);
        assert!(channel.close().unwrap().unwrap().success());
    }

    #[test]
    fn test_echo_through_stdin_poll() {
        echo_through_stdin::<PollBackend>();
    }

    #[test]
    fn test_echo_through_stdin_thread() {
        echo_through_stdin::<ThreadBackend>();
    }

    #[test]
    fn test_close_drains_and_reports_exit_status() {
        let mut channel = sh::<PollBackend>("echo unread; echo also >&2; exit 3");
        let status = channel.close().unwrap().unwrap();
        assert_eq!(status.code(), Some(3));
        assert!(channel.is_closed());
        assert_eq!(channel.pid(), None);
        assert_eq!(channel.close().unwrap(), None);
        assert!(matches!(
            channel.getline_in(),
            Err(FatalError::ChannelClosed)
        ));
    }

    #[test]
    fn test_default_channel_is_inert() {
        let channel = ProcessChannel::<PollBackend>::default();
        assert!(channel.is_closed());
        assert!(channel.is_eof(StreamKind::Stderr));
        channel.close_write();
        assert!(matches!(channel.write(b"x"), Err(FatalError::ChannelClosed)));
    }

    #[test]
    fn test_getline_never_blocks() {
        let channel = sh::<PollBackend>("sleep 5");
        assert_eq!(channel.getline_in().unwrap(), None);
        assert_eq!(channel.getline_err().unwrap(), None);
        // Dropping kills the sleeping child and abandons both readers
        drop(channel);
    }

    #[test]
    fn test_argv_zero_is_program_name() {
        let mut channel =
            ProcessChannel::<PollBackend>::open("/bin/sh", &["custom-name", "-c", "echo $0"])
                .unwrap();
        assert_eq!(channel.getline_in_block().unwrap().unwrap(), "custom-name");
        channel.close().unwrap();
    }

    #[test]
    fn test_open_failures() {
        let err = ProcessChannel::<PollBackend>::open("/nonexistent/program", &["x"]).unwrap_err();
        assert!(matches!(err, FatalError::Spawn { .. }));

        let empty: [&str; 0] = [];
        let err = ProcessChannel::<PollBackend>::open("/bin/sh", &empty).unwrap_err();
        assert!(matches!(err, FatalError::InvalidArgument(_)));
    }

    #[test]
    fn test_stream_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&StreamKind::Stderr).unwrap(), "\"stderr\"");
        assert_eq!(StreamKind::Stdout.to_string(), "stdout");
    }
}
