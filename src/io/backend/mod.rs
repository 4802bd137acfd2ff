//! Readiness backends
//!
//! Two structurally different ways of learning that a pipe has data:
//!
//! - [`PollBackend`] (unix): the stream is read directly and its descriptor
//!   is handed to `poll(2)`.
//! - [`ThreadBackend`] (portable): a dedicated thread per stream performs
//!   the blocking reads and signals a readiness [`Event`](crate::io::event::Event).
//!
//! [`PlatformBackend`] picks one per platform. The selector only talks to the
//! [`WaitSet`] capability interface, so callers cannot tell them apart.

#[cfg(unix)]
mod poll;
mod thread;

#[cfg(unix)]
pub use poll::{PollBackend, PollWaitSet};
pub use thread::{SignalWaitSet, ThreadBackend};

use crate::error::FatalError;
use crate::io::line_reader::LineSource;
use crate::io::process::ChildPipe;
use crate::timeout::Timeout;

#[cfg(unix)]
pub type PlatformBackend = PollBackend;

#[cfg(not(unix))]
pub type PlatformBackend = ThreadBackend;

/// Largest number of handles a single wait may cover
pub const MAX_WAIT_HANDLES: usize = 64;

/// A set of stream readiness handles that can be waited on together
pub trait WaitSet: Default {
    type Stream;

    /// Forget every registered handle
    fn clear(&mut self);

    /// Add a stream's readiness handle; returns the token for [`WaitSet::poll`]
    fn register(&mut self, stream: &Self::Stream) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block up to `timeout` until any registered handle is signaled
    ///
    /// A zero timeout only samples the handles. Returns whether any handle
    /// is signaled.
    fn wait(&mut self, timeout: Timeout) -> Result<bool, FatalError>;

    /// Whether the handle behind `token` was signaled by the last wait
    fn poll(&self, token: usize) -> bool;
}

/// Pairs a stream implementation with the wait primitive that can watch it
pub trait Backend: Sized + 'static {
    type Stream: LineSource;
    type WaitSet: WaitSet<Stream = Self::Stream>;

    const NAME: &'static str;

    /// Wrap one of a child's output pipes
    fn attach(pipe: ChildPipe) -> Result<Self::Stream, FatalError>;
}
