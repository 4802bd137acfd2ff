//! Error types shared by every channel kind
//!
//! Failures fall into two disjoint classes:
//!
//! - [`FatalError`]: a native call failed unexpectedly or a contract was
//!   broken (line overrun, selector overflow, bad address). There is no
//!   sane local recovery; the owning process is expected to terminate via
//!   [`die`] or [`OrDie::or_die`].
//! - [`TransferError`]: a timed socket transfer ran out of time or the peer
//!   hung up. These are expected under adverse network conditions and are
//!   left to the caller's retry policy.

use std::fmt;
use std::io;
use std::net::SocketAddrV4;

use tracing::error;

/// Exit status used when a fatal condition terminates the process
pub const FATAL_EXIT_CODE: i32 = 1;

// ============================================================================
// Fatal Errors
// ============================================================================

/// Conditions that indicate a broken precondition or an exhausted resource
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    /// A native call failed
    #[error("{op}() failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The child process could not be spawned
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A line grew past the accumulator cap
    #[error("buffer overrun: line exceeds {limit} bytes")]
    LineOverrun { limit: usize },

    /// The reader failed earlier and cannot produce further lines
    #[error("line reader is poisoned by an earlier failure")]
    ReaderPoisoned,

    /// More channels were registered than the wait primitive supports
    #[error("selector capacity of {capacity} channels exceeded")]
    SelectorFull { capacity: usize },

    /// The socket address is not a dotted-quad IPv4 address
    #[error("bad address {0}")]
    BadAddress(String),

    /// Connecting to the remote endpoint failed
    #[error("connect() to {addr} failed: {source}")]
    Connect {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    /// A write was attempted after the write side was closed
    #[error("write side of the channel is closed")]
    WriteClosed,

    /// The channel was never opened or has been fully closed
    #[error("channel is closed")]
    ChannelClosed,

    /// A background reader thread went away without reporting end of stream
    #[error("background reader for {stream} terminated unexpectedly")]
    ReaderLost { stream: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl FatalError {
    /// Wrap the last OS error for the named native call
    pub(crate) fn os(op: &'static str, source: io::Error) -> Self {
        FatalError::Os { op, source }
    }
}

// ============================================================================
// Recoverable Transfer Errors
// ============================================================================

/// Direction of a timed socket transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => f.write_str("send"),
            Direction::Recv => f.write_str("recv"),
        }
    }
}

/// Errors reported by [`crate::SocketChannel::send`] and [`crate::SocketChannel::recv`]
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// A readiness wait expired without moving a single byte
    #[error("select for {direction} timeout after {transferred} of {expected} bytes")]
    Timeout {
        direction: Direction,
        transferred: usize,
        expected: usize,
    },

    /// The peer closed the connection before the full length arrived
    #[error("server closed connection after {received} of {expected} bytes")]
    ConnectionClosed { received: usize, expected: usize },

    /// The transfer hit a fatal condition
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl TransferError {
    /// True for timeouts and peer closure, false for fatal conditions
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TransferError::Fatal(_))
    }
}

// ============================================================================
// Process Termination
// ============================================================================

/// Log a fatal diagnostic and terminate the process
pub fn die(err: &dyn std::error::Error) -> ! {
    error!(error = %err, "fatal error, terminating");
    eprintln!("linemux: {err}");
    std::process::exit(FATAL_EXIT_CODE)
}

/// Terminate the process when a fatal condition is reported
pub trait OrDie<T> {
    fn or_die(self) -> T;
}

impl<T> OrDie<T> for Result<T, FatalError> {
    fn or_die(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => die(&e),
        }
    }
}

/// Terminate on [`TransferError::Fatal`], pass recoverable errors through
pub trait DieOnFatal<T> {
    fn die_on_fatal(self) -> Result<T, TransferError>;
}

impl<T> DieOnFatal<T> for Result<T, TransferError> {
    fn die_on_fatal(self) -> Result<T, TransferError> {
        match self {
            Err(TransferError::Fatal(e)) => die(&e),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let timeout = TransferError::Timeout {
            direction: Direction::Send,
            transferred: 0,
            expected: 10,
        };
        assert!(timeout.is_recoverable());

        let closed = TransferError::ConnectionClosed {
            received: 3,
            expected: 10,
        };
        assert!(closed.is_recoverable());

        let fatal = TransferError::from(FatalError::ChannelClosed);
        assert!(!fatal.is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = FatalError::os("read", io::Error::other("bad descriptor"));
        assert!(err.to_string().starts_with("read() failed:"));

        let err = FatalError::LineOverrun { limit: 65536 };
        assert_eq!(err.to_string(), "buffer overrun: line exceeds 65536 bytes");

        let err = TransferError::Timeout {
            direction: Direction::Recv,
            transferred: 4,
            expected: 8,
        };
        assert_eq!(
            err.to_string(),
            "select for recv timeout after 4 of 8 bytes"
        );
    }

    #[test]
    fn test_die_on_fatal_passes_recoverable() {
        let result: Result<(), TransferError> = Err(TransferError::ConnectionClosed {
            received: 0,
            expected: 1,
        });
        assert!(matches!(
            result.die_on_fatal(),
            Err(TransferError::ConnectionClosed { .. })
        ));
    }
}
