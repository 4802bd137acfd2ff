//! Manual-reset readiness events
//!
//! An [`Event`] stays set until explicitly reset. [`wait_any`] blocks on a
//! group of events with a timeout by subscribing one shared doorbell to
//! each of them for the duration of the wait.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct EventState {
    set: bool,
    listeners: Vec<Arc<Doorbell>>,
}

/// Binary readiness indicator shared between a reader thread and a poller
#[derive(Debug, Default)]
pub struct Event {
    state: Mutex<EventState>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EventState> {
        // Poisoning is ignored: the state is plain flags
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self) {
        let mut state = self.lock();
        state.set = true;
        for bell in &state.listeners {
            bell.ring();
        }
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        self.lock().set = false;
    }

    pub fn is_set(&self) -> bool {
        self.lock().set
    }

    /// Block until the event is set
    pub fn wait(&self) {
        let mut state = self.lock();
        while !state.set {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns whether the event was already set at subscription time
    fn subscribe(&self, bell: &Arc<Doorbell>) -> bool {
        let mut state = self.lock();
        state.listeners.push(Arc::clone(bell));
        state.set
    }

    fn unsubscribe(&self, bell: &Arc<Doorbell>) {
        self.lock()
            .listeners
            .retain(|listener| !Arc::ptr_eq(listener, bell));
    }
}

#[derive(Debug, Default)]
struct Doorbell {
    rung: Mutex<bool>,
    cond: Condvar,
}

impl Doorbell {
    fn ring(&self) {
        *self.rung.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut rung = self.rung.lock().unwrap_or_else(PoisonError::into_inner);
        while !*rung {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(rung, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            rung = guard;
        }
        *rung
    }
}

/// Wait until any event is set or `timeout` elapses
///
/// Returns the set/unset status of every event after the wait, in order.
pub fn wait_any(events: &[Arc<Event>], timeout: Duration) -> Vec<bool> {
    let bell = Arc::new(Doorbell::default());

    let mut already_set = false;
    for event in events {
        already_set |= event.subscribe(&bell);
    }
    if !already_set && !events.is_empty() && !timeout.is_zero() {
        bell.wait_timeout(timeout);
    }
    for event in events {
        event.unsubscribe(&bell);
    }

    events.iter().map(|event| event.is_set()).collect()
}
