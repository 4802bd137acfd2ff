//! Process-wide shutdown signal handling
//!
//! [`ShutdownSignal::install`] starts a helper thread running a
//! current-thread tokio runtime that listens for SIGINT, SIGTERM and SIGHUP
//! (Ctrl-C only on other platforms). The first signal raises a flag the
//! relay loop polls between waits; a second one exits immediately. Only
//! one listener may be installed at a time, and dropping it tears the
//! thread down.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::FatalError;

/// Exit status after a second interrupt
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Shutdown request flag, optionally fed by OS signals
#[derive(Debug)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
    stop: Option<oneshot::Sender<()>>,
    listener: Option<JoinHandle<()>>,
}

impl ShutdownSignal {
    /// A flag that only [`request`](Self::request) can raise
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            stop: None,
            listener: None,
        }
    }

    /// Register the process-wide signal listener
    ///
    /// Returns once the handlers are in place.
    pub fn install() -> Result<Self, FatalError> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(FatalError::InvalidArgument(
                "signal listener already installed".to_string(),
            ));
        }

        let requested = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let flag = Arc::clone(&requested);
        let spawned = thread::Builder::new()
            .name("linemux-signals".to_string())
            .spawn(move || listen(flag, stop_rx, ready_tx));
        let listener = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                INSTALLED.store(false, Ordering::SeqCst);
                return Err(FatalError::os("thread spawn", e));
            }
        };

        // Sync caller; the runtime lives on the listener thread
        let registered = ready_rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(io::Error::other("signal listener exited early")));
        if let Err(e) = registered {
            let _ = listener.join();
            INSTALLED.store(false, Ordering::SeqCst);
            return Err(FatalError::os("sigaction", e));
        }

        debug!("ShutdownSignal: listener installed");
        Ok(Self {
            requested,
            stop: Some(stop_tx),
            listener: Some(listener),
        })
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ShutdownSignal {
    fn drop(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = listener.join();
        INSTALLED.store(false, Ordering::SeqCst);
        debug!("ShutdownSignal: listener removed");
    }
}

fn listen(
    requested: Arc<AtomicBool>,
    mut stop: oneshot::Receiver<()>,
    ready: oneshot::Sender<io::Result<()>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    runtime.block_on(async move {
        #[cfg(unix)]
        let (mut int, mut term, mut hup) = match unix_streams() {
            Ok(streams) => streams,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let _ = ready.send(Ok(()));

        loop {
            #[cfg(unix)]
            let name = tokio::select! {
                _ = &mut stop => break,
                _ = int.recv() => "SIGINT",
                _ = term.recv() => "SIGTERM",
                _ = hup.recv() => "SIGHUP",
            };
            #[cfg(not(unix))]
            let name = tokio::select! {
                _ = &mut stop => break,
                _ = tokio::signal::ctrl_c() => "Ctrl-C",
            };

            if requested.swap(true, Ordering::SeqCst) {
                warn!("ShutdownSignal: second {} received, exiting", name);
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
            info!("ShutdownSignal: {} received, shutting down", name);
        }
    });
}

#[cfg(unix)]
fn unix_streams() -> io::Result<(
    tokio::signal::unix::Signal,
    tokio::signal::unix::Signal,
    tokio::signal::unix::Signal,
)> {
    use tokio::signal::unix::{SignalKind, signal};
    Ok((
        signal(SignalKind::interrupt())?,
        signal(SignalKind::terminate())?,
        signal(SignalKind::hangup())?,
    ))
}
