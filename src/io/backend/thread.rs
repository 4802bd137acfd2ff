//! Thread-and-signal readiness, usable on every platform

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use super::{Backend, WaitSet};
use crate::error::FatalError;
use crate::io::event::{self, Event};
use crate::io::process::ChildPipe;
use crate::io::threaded::ThreadedLineReader;
use crate::timeout::Timeout;

/// One reader thread per stream, readiness through manual-reset events
#[derive(Debug)]
pub enum ThreadBackend {}

impl Backend for ThreadBackend {
    type Stream = ThreadedLineReader;
    type WaitSet = SignalWaitSet;

    const NAME: &'static str = "thread";

    fn attach(pipe: ChildPipe) -> Result<Self::Stream, FatalError> {
        let label = pipe.to_string();
        ThreadedLineReader::spawn(pipe, label)
    }
}

/// Wait set over reader-thread readiness events
#[derive(Debug, Default)]
pub struct SignalWaitSet {
    events: Vec<Arc<Event>>,
    signaled: Vec<bool>,
}

impl WaitSet for SignalWaitSet {
    type Stream = ThreadedLineReader;

    fn clear(&mut self) {
        self.events.clear();
        self.signaled.clear();
    }

    fn register(&mut self, stream: &Self::Stream) -> usize {
        self.events.push(stream.readiness());
        self.signaled.push(false);
        self.events.len() - 1
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn wait(&mut self, timeout: Timeout) -> Result<bool, FatalError> {
        if self.events.is_empty() {
            std::thread::sleep(Duration::from(timeout));
            return Ok(false);
        }

        self.signaled = event::wait_any(&self.events, timeout.as_duration());
        let ready = self.signaled.iter().filter(|s| **s).count();
        trace!(
            "SignalWaitSet: {} of {} events signaled",
            ready,
            self.events.len()
        );
        Ok(ready > 0)
    }

    fn poll(&self, token: usize) -> bool {
        self.signaled.get(token).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::line_reader::LineSource;
    use crate::test_utils::ScriptedReader;

    #[test]
    fn test_wait_reports_parked_line() {
        let inner = ScriptedReader::new(vec![b"ping\n".to_vec()]);
        let mut reader = ThreadedLineReader::spawn(inner, "test").unwrap();
        let mut set = SignalWaitSet::default();
        let token = set.register(&reader);

        assert!(set.wait(Timeout::from_secs(5)).unwrap());
        assert!(set.poll(token));
        assert!(!set.poll(token + 1));

        reader.load().unwrap();
        assert_eq!(reader.getline().unwrap().unwrap(), "ping");
        assert_eq!(reader.getline_block().unwrap(), None);
    }

    #[test]
    fn test_clear_forgets_handles() {
        let inner = ScriptedReader::new(vec![]);
        let mut reader = ThreadedLineReader::spawn(inner, "test").unwrap();
        let mut set = SignalWaitSet::default();
        set.register(&reader);
        assert_eq!(set.len(), 1);
        set.clear();
        assert!(set.is_empty());
        assert_eq!(reader.getline_block().unwrap(), None);
    }
}
