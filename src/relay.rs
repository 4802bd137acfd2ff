//! Relay child output as a stream of events
//!
//! A [`Relay`] owns a set of [`ProcessChannel`]s, drives a [`Selector`]
//! over them until every output stream has ended, and hands each line, end
//! of stream and exit status to a caller-supplied sink.

use std::fmt;
use std::process::ExitStatus;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Level, debug, info};

use crate::config::IoConfig;
use crate::error::FatalError;
use crate::io::{Backend, PlatformBackend, ProcessChannel, Ready, SELECTOR_CAPACITY, Selector, StreamKind};
use crate::signal::ShutdownSignal;
use crate::{log_relay_line, log_timing};

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Line,
    Eof,
    Exit,
}

/// One observation about one child
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayEvent {
    /// Index of the channel in spawn order
    pub channel: usize,
    /// Absent for exit events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamKind>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Exit code; absent when the child was killed by a signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    pub at: DateTime<Utc>,
}

impl RelayEvent {
    fn new(channel: usize, stream: Option<StreamKind>, kind: EventKind) -> Self {
        Self {
            channel,
            stream,
            kind,
            text: None,
            code: None,
            at: Utc::now(),
        }
    }

    fn line(channel: usize, stream: StreamKind, text: String) -> Self {
        Self {
            text: Some(text),
            ..Self::new(channel, Some(stream), EventKind::Line)
        }
    }

    fn eof(channel: usize, stream: StreamKind) -> Self {
        Self::new(channel, Some(stream), EventKind::Eof)
    }

    fn exit(channel: usize, status: Option<ExitStatus>) -> Self {
        Self {
            code: status.and_then(|s| s.code()),
            ..Self::new(channel, None, EventKind::Exit)
        }
    }
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.stream) {
            (EventKind::Line, Some(stream)) => write!(
                f,
                "[{}:{}] {}",
                self.channel,
                stream,
                self.text.as_deref().unwrap_or_default()
            ),
            (EventKind::Eof, Some(stream)) => write!(f, "[{}:{}] <eof>", self.channel, stream),
            _ => match self.code {
                Some(code) => write!(f, "[{}] exited with code {}", self.channel, code),
                None => write!(f, "[{}] terminated by signal", self.channel),
            },
        }
    }
}

// ============================================================================
// Relay
// ============================================================================

/// Spawns children and relays their output until all of them finish
pub struct Relay<B: Backend = PlatformBackend> {
    channels: Vec<ProcessChannel<B>>,
    config: IoConfig,
}

impl<B: Backend> Relay<B> {
    pub fn new(config: IoConfig) -> Self {
        Self {
            channels: Vec::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Spawn `argv[0]` with `argv` as its argument vector; returns its index
    pub fn spawn<S: AsRef<str>>(&mut self, argv: &[S]) -> Result<usize, FatalError> {
        if self.channels.len() >= SELECTOR_CAPACITY {
            return Err(FatalError::SelectorFull {
                capacity: SELECTOR_CAPACITY,
            });
        }
        let argv: Vec<&str> = argv.iter().map(AsRef::as_ref).collect();
        let program = *argv
            .first()
            .ok_or_else(|| FatalError::InvalidArgument("empty command".to_string()))?;
        let channel = ProcessChannel::open(program, &argv)?;
        self.channels.push(channel);
        Ok(self.channels.len() - 1)
    }

    /// Split a shell-style command line and spawn it
    pub fn spawn_command_line(&mut self, line: &str) -> Result<usize, FatalError> {
        let argv = shell_words::split(line)
            .map_err(|e| FatalError::InvalidArgument(format!("{line}: {e}")))?;
        self.spawn(&argv)
    }

    /// Write `input` to every child's stdin
    pub fn broadcast(&self, input: &[u8]) -> Result<(), FatalError> {
        for channel in &self.channels {
            channel.write_all(input)?;
        }
        Ok(())
    }

    /// Half-close every child's stdin
    pub fn close_inputs(&self) {
        for channel in &self.channels {
            channel.close_write();
        }
    }

    /// Relay until every output stream has ended, then reap every child
    ///
    /// A shutdown request half-closes every stdin once and keeps draining.
    pub fn run<F>(&mut self, shutdown: &ShutdownSignal, mut sink: F) -> Result<Vec<Option<ExitStatus>>, FatalError>
    where
        F: FnMut(RelayEvent) -> std::io::Result<()>,
    {
        let start = Instant::now();
        let mut emit = |event: RelayEvent| sink(event).map_err(|e| FatalError::os("write", e));

        {
            let mut selector = Selector::<B>::new();
            for channel in &self.channels {
                selector.add(channel)?;
            }

            let mut open_streams = self.channels.len() * StreamKind::ALL.len();
            let mut inputs_closed = false;
            debug!(
                "Relay: watching {} streams with {} wait timeout",
                open_streams, self.config.wait_timeout
            );

            while open_streams > 0 {
                if !inputs_closed && shutdown.is_requested() {
                    info!("Relay: shutdown requested, closing child inputs");
                    self.close_inputs();
                    inputs_closed = true;
                }

                selector.wait(self.config.wait_timeout)?;

                for (index, channel) in self.channels.iter().enumerate() {
                    for kind in StreamKind::ALL {
                        while let Some(ready) = selector.try_getline(channel, kind) {
                            match ready {
                                Ready::Line(line) => {
                                    log_relay_line!(Level::TRACE, index, kind, line);
                                    let text = line.to_string_lossy().into_owned();
                                    emit(RelayEvent::line(index, kind, text))?;
                                }
                                Ready::Eof => {
                                    open_streams -= 1;
                                    emit(RelayEvent::eof(index, kind))?;
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut statuses = Vec::with_capacity(self.channels.len());
        for (index, channel) in self.channels.iter_mut().enumerate() {
            let status = channel.close()?;
            emit(RelayEvent::exit(index, status))?;
            statuses.push(status);
        }

        log_timing!(Level::DEBUG, "relay", start.elapsed());
        Ok(statuses)
    }
}

impl<B: Backend> fmt::Debug for Relay<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("channels", &self.channels)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::io::{PollBackend, ThreadBackend};
    use crate::timeout::Timeout;

    fn collect<B: Backend>(relay: &mut Relay<B>, shutdown: &ShutdownSignal) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        relay
            .run(shutdown, |event| {
                events.push(event);
                Ok(())
            })
            .unwrap();
        events
    }

    fn lines_of(events: &[RelayEvent], channel: usize, stream: StreamKind) -> Vec<String> {
        events
            .iter()
            .filter(|e| e.channel == channel && e.stream == Some(stream) && e.kind == EventKind::Line)
            .filter_map(|e| e.text.clone())
            .collect()
    }

    fn relays_two_children<B: Backend>() {
        let config = IoConfig::builder()
            .wait_timeout(Timeout::from_millis(50))
            .build()
            .unwrap();
        let mut relay = Relay::<B>::new(config);
        relay
            .spawn(&["sh", "-c", "cat >/dev/null; printf 'a\\r\\nb'; echo oops >&2; exit 4"])
            .unwrap();
        relay.spawn_command_line("sh -c 'cat; echo done'").unwrap();
        relay.broadcast(b"fed\n").unwrap();
        relay.close_inputs();

        let events = collect(&mut relay, &ShutdownSignal::new());

        assert_eq!(lines_of(&events, 0, StreamKind::Stdout), ["a", "b"]);
        assert_eq!(lines_of(&events, 0, StreamKind::Stderr), ["oops"]);
        assert_eq!(lines_of(&events, 1, StreamKind::Stdout), ["fed", "done"]);

        let eofs = events.iter().filter(|e| e.kind == EventKind::Eof).count();
        assert_eq!(eofs, 4);

        let exits: Vec<_> = events.iter().filter(|e| e.kind == EventKind::Exit).collect();
        assert_eq!(exits.len(), 2);
        assert_eq!(exits[0].code, Some(4));
        assert_eq!(exits[1].code, Some(0));
        assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Exit));
    }

    #[test]
    fn test_relays_two_children_poll() {
        relays_two_children::<PollBackend>();
    }

    #[test]
    fn test_relays_two_children_thread() {
        relays_two_children::<ThreadBackend>();
    }

    #[test]
    fn test_shutdown_closes_inputs() {
        let mut relay = Relay::<PollBackend>::new(IoConfig::default());
        relay.spawn(&["cat"]).unwrap();
        let shutdown = ShutdownSignal::new();
        shutdown.request();

        let events = collect(&mut relay, &shutdown);
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].code, Some(0));
    }

    #[test]
    fn test_spawn_errors() {
        let mut relay = Relay::<PollBackend>::new(IoConfig::default());
        let empty: [&str; 0] = [];
        assert!(matches!(relay.spawn(&empty), Err(FatalError::InvalidArgument(_))));
        assert!(matches!(
            relay.spawn_command_line("sh -c 'unterminated"),
            Err(FatalError::InvalidArgument(_))
        ));
        assert!(relay.is_empty());
    }

    #[test]
    fn test_event_formats() {
        let line = RelayEvent::line(1, StreamKind::Stderr, "hi".to_string());
        assert_eq!(line.to_string(), "[1:stderr] hi");

        let json: serde_json::Value = serde_json::to_value(&line).unwrap();
        assert_eq!(json["stream"], "stderr");
        assert_eq!(json["kind"], "line");
        assert_eq!(json["text"], "hi");
        assert!(json.get("code").is_none());
        assert!(json["at"].is_string());

        let exit = RelayEvent::exit(0, None);
        assert_eq!(exit.to_string(), "[0] terminated by signal");
        let json = serde_json::to_value(&exit).unwrap();
        assert!(json.get("stream").is_none());
    }
}
