//! Thread-backed line reader
//!
//! For platforms whose wait primitive cannot watch pipe handles, each stream
//! gets one background thread that performs the blocking native reads and
//! frames lines with a [`LineReader`]. Every completed line is parked in a
//! handoff slot and announced through a readiness [`Event`]; the thread then
//! sleeps until the polling side has taken the line and asks for the next.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use crate::error::FatalError;
use crate::io::event::Event;
use crate::io::line_reader::{Line, LineReader, LineSource};

#[derive(Debug, Default)]
struct Slot {
    line: Option<Line>,
    error: Option<FatalError>,
    /// Set by the poller once the parked line has been taken
    do_read: bool,
    abandoned: bool,
}

#[derive(Debug, Default)]
struct Handoff {
    slot: Mutex<Slot>,
    do_read: Condvar,
    has_line: Arc<Event>,
    eof: AtomicBool,
}

impl Handoff {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reports a lost reader if the worker unwinds before finishing
struct WorkerGuard<'a> {
    shared: &'a Handoff,
    label: &'a str,
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let mut slot = self.shared.lock();
            slot.error = Some(FatalError::ReaderLost {
                stream: self.label.to_string(),
            });
            self.shared.has_line.set();
        }
    }
}

fn reader_loop<R: Read>(mut reader: LineReader<R>, shared: &Handoff, label: &str) {
    let _guard = WorkerGuard { shared, label };

    loop {
        let outcome = reader.getline_block();

        let mut slot = shared.lock();
        let finished = match outcome {
            Ok(Some(line)) => {
                slot.line = Some(line);
                false
            }
            Ok(None) => {
                trace!("ThreadedLineReader[{}]: end of stream", label);
                shared.eof.store(true, Ordering::Release);
                true
            }
            Err(e) => {
                slot.error = Some(e);
                true
            }
        };
        slot.do_read = false;
        shared.has_line.set();
        if finished {
            return;
        }

        while !slot.do_read && !slot.abandoned {
            slot = shared
                .do_read
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if slot.abandoned {
            drop(slot);
            reader.abandon();
            trace!("ThreadedLineReader[{}]: abandoned", label);
            return;
        }
    }
}

/// Line source fed by a dedicated reader thread
pub struct ThreadedLineReader {
    shared: Arc<Handoff>,
    ready: Option<Line>,
    label: String,
    poisoned: bool,
    abandoned: bool,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedLineReader {
    /// Start the background reader for `inner`
    pub fn spawn<R>(inner: R, label: impl Into<String>) -> Result<Self, FatalError>
    where
        R: Read + Send + 'static,
    {
        let label = label.into();
        let shared = Arc::new(Handoff::default());

        let worker_shared = Arc::clone(&shared);
        let worker_label = label.clone();
        let worker = thread::Builder::new()
            .name(format!("linemux-{label}"))
            .spawn(move || reader_loop(LineReader::new(inner), &worker_shared, &worker_label))
            .map_err(|e| FatalError::os("thread spawn", e))?;

        debug!("ThreadedLineReader[{}]: reader thread started", label);
        Ok(Self {
            shared,
            ready: None,
            label,
            poisoned: false,
            abandoned: false,
            worker: Some(worker),
        })
    }

    /// Event signaled whenever a line (or end of stream) is parked
    pub fn readiness(&self) -> Arc<Event> {
        Arc::clone(&self.shared.has_line)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl LineSource for ThreadedLineReader {
    /// Block until the reader thread parks a line, then take it
    ///
    /// A line already taken but not yet returned by `getline` is kept and
    /// the call returns immediately.
    fn load(&mut self) -> Result<(), FatalError> {
        if self.poisoned {
            return Err(FatalError::ReaderPoisoned);
        }
        if self.is_eof() || self.ready.is_some() {
            return Ok(());
        }

        self.shared.has_line.wait();

        let mut slot = self.shared.lock();
        self.ready = slot.line.take();
        let error = slot.error.take();
        self.shared.has_line.reset();
        if error.is_none() && !self.shared.eof.load(Ordering::Acquire) {
            slot.do_read = true;
            self.shared.do_read.notify_one();
        }
        drop(slot);

        if let Some(e) = error {
            self.poisoned = true;
            return Err(e);
        }
        Ok(())
    }

    fn getline(&mut self) -> Result<Option<Line>, FatalError> {
        if self.poisoned {
            return Err(FatalError::ReaderPoisoned);
        }
        Ok(self.ready.take())
    }

    fn is_eof(&self) -> bool {
        self.abandoned || (self.ready.is_none() && self.shared.eof.load(Ordering::Acquire))
    }

    fn abandon(&mut self) {
        self.abandoned = true;
        self.ready = None;

        let mut slot = self.shared.lock();
        slot.abandoned = true;
        self.shared.do_read.notify_one();
        drop(slot);

        // The worker may still be blocked in a native read
        self.worker.take();
    }
}

impl Drop for ThreadedLineReader {
    fn drop(&mut self) {
        if !self.is_eof() && !self.poisoned {
            if !thread::panicking() {
                panic!("line reader dropped before end of stream");
            }
            // Unwinding; never join a worker that may sit in a read
            self.abandon();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for ThreadedLineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedLineReader")
            .field("label", &self.label)
            .field("ready", &self.ready)
            .field("eof", &self.is_eof())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
