//! Multi-channel readiness selector
//!
//! Each registered stream moves through
//! `Pending -> Ready (line) | AtEof`, and finally to `Done` once the caller
//! has consumed the end-of-stream notification.
//!
//! A wait cycle:
//!
//! 1. Every open, not-done stream gets an immediate non-blocking `getline`.
//!    A produced line goes to the stream's pending slot; a line or an EOF
//!    marks the cycle as having something ready. Streams with nothing to
//!    report are added to the wait set.
//! 2. If something was ready, the wait set is only sampled (zero timeout).
//! 3. Otherwise the wait set blocks for up to the timeout. An empty wait
//!    set sleeps for the full timeout instead.
//! 4. Every signaled stream is loaded once and asked for one line.

use tracing::trace;

use crate::error::FatalError;
use crate::io::backend::{Backend, MAX_WAIT_HANDLES, PlatformBackend, WaitSet};
use crate::io::line_reader::{Line, LineSource};
use crate::io::process::{ProcessChannel, StreamKind, StreamSlot};
use crate::timeout::Timeout;

/// Maximum number of channels per selector; each channel needs two handles
pub const SELECTOR_CAPACITY: usize = MAX_WAIT_HANDLES / 2;

/// Outcome of a successful [`Selector::try_getline`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ready {
    Line(Line),
    /// The stream has ended; reported once per stream
    Eof,
}

/// Observable state of one registered stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing to report yet
    Pending,
    /// A line is waiting in the pending slot
    Ready,
    /// The stream has ended but the caller has not been told
    AtEof,
    /// End of stream has been reported
    Done,
}

#[derive(Debug, Clone, Copy)]
struct Watched {
    channel: usize,
    kind: StreamKind,
    token: usize,
}

/// Waits across the output streams of many [`ProcessChannel`]s
///
/// The selector only borrows the channels; they must outlive it.
pub struct Selector<'a, B: Backend = PlatformBackend> {
    channels: Vec<&'a ProcessChannel<B>>,
    wait_set: B::WaitSet,
    watched: Vec<Watched>,
}

impl<'a, B: Backend> Selector<'a, B> {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            wait_set: B::WaitSet::default(),
            watched: Vec::new(),
        }
    }

    /// Drop every registration
    pub fn reset(&mut self) {
        self.channels.clear();
        self.wait_set.clear();
        self.watched.clear();
    }

    /// Register a channel
    ///
    /// Fails with [`FatalError::SelectorFull`] once
    /// [`SELECTOR_CAPACITY`] channels are registered.
    pub fn add(&mut self, channel: &'a ProcessChannel<B>) -> Result<(), FatalError> {
        if self.channels.len() >= SELECTOR_CAPACITY {
            return Err(FatalError::SelectorFull {
                capacity: SELECTOR_CAPACITY,
            });
        }
        self.channels.push(channel);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn capacity(&self) -> usize {
        SELECTOR_CAPACITY
    }

    /// Block up to `timeout` until a registered stream has a line or ends
    ///
    /// Returns without side effects when the timeout expires. Results are
    /// collected with [`try_getline`](Self::try_getline).
    pub fn wait(&mut self, timeout: Timeout) -> Result<(), FatalError> {
        self.wait_set.clear();
        self.watched.clear();

        // Step 1: eager non-blocking pass
        let mut has_msg = false;
        for (index, channel) in self.channels.iter().enumerate() {
            for kind in StreamKind::ALL {
                let Some(mut slot) = channel.slot(kind) else {
                    break;
                };
                if slot.done {
                    continue;
                }
                if slot.pending.is_none() {
                    slot.pending = slot.reader.getline()?;
                }
                if slot.pending.is_some() || slot.reader.is_eof() {
                    has_msg = true;
                } else {
                    let token = self.wait_set.register(&slot.reader);
                    self.watched.push(Watched {
                        channel: index,
                        kind,
                        token,
                    });
                }
            }
        }

        // Steps 2 and 3
        if has_msg {
            if !self.wait_set.is_empty() {
                self.wait_set.wait(Timeout::ZERO)?;
            }
        } else if !self.wait_set.wait(timeout)? {
            trace!("Selector: wait timed out after {}", timeout);
            return Ok(());
        }

        // Step 4: load what became readable
        let mut loaded = 0;
        for watched in &self.watched {
            if !self.wait_set.poll(watched.token) {
                continue;
            }
            let Some(mut slot) = self.channels[watched.channel].slot(watched.kind) else {
                continue;
            };
            load_one(&mut slot)?;
            loaded += 1;
        }
        trace!(
            "Selector: {} streams watched, {} loaded, fast path {}",
            self.watched.len(),
            loaded,
            has_msg
        );
        Ok(())
    }

    /// Take what a stream has to report, if anything
    ///
    /// Returns the pending line if one is stored, [`Ready::Eof`] exactly once
    /// when the stream first reaches end of stream, and `None` otherwise,
    /// including for every later call on a finished stream.
    pub fn try_getline(&self, channel: &ProcessChannel<B>, kind: StreamKind) -> Option<Ready> {
        let mut slot = channel.slot(kind)?;
        if slot.done {
            return None;
        }
        if let Some(line) = slot.pending.take() {
            return Some(Ready::Line(line));
        }
        if slot.reader.is_eof() {
            slot.done = true;
            return Some(Ready::Eof);
        }
        None
    }

    pub fn try_getline_in(&self, channel: &ProcessChannel<B>) -> Option<Ready> {
        self.try_getline(channel, StreamKind::Stdout)
    }

    pub fn try_getline_err(&self, channel: &ProcessChannel<B>) -> Option<Ready> {
        self.try_getline(channel, StreamKind::Stderr)
    }

    /// Current state of one stream; an inert channel reports `Done`
    pub fn stream_state(&self, channel: &ProcessChannel<B>, kind: StreamKind) -> StreamState {
        match channel.slot(kind) {
            None => StreamState::Done,
            Some(slot) if slot.done => StreamState::Done,
            Some(slot) if slot.pending.is_some() => StreamState::Ready,
            Some(slot) if slot.reader.is_eof() => StreamState::AtEof,
            Some(_) => StreamState::Pending,
        }
    }
}

fn load_one<S: LineSource>(slot: &mut StreamSlot<S>) -> Result<(), FatalError> {
    if slot.reader.is_eof() || slot.pending.is_some() {
        return Ok(());
    }
    slot.reader.load()?;
    slot.pending = slot.reader.getline()?;
    Ok(())
}

impl<B: Backend> Default for Selector<'_, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> std::fmt::Debug for Selector<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("channels", &self.channels.len())
            .field("backend", &B::NAME)
            .finish()
    }
}
