//! Line-oriented, multiplexed, timeout-bounded I/O
//!
//! Drives spawned child processes and TCP peers without ever blocking
//! indefinitely on a single source: child output is framed into lines by a
//! [`LineReader`], many children are watched at once by a [`Selector`], and
//! socket transfers move exact byte counts under per-chunk timeouts via a
//! [`SocketChannel`].

pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod relay;
pub mod signal;
pub mod timeout;

#[cfg(test)]
mod test_utils;

pub use error::{DieOnFatal, Direction, FatalError, OrDie, TransferError, die};
pub use io::{
    Line, LineReader, LineSource, PlatformBackend, ProcessChannel, Ready, Selector, SocketChannel,
    StreamKind, StreamState,
};
pub use timeout::Timeout;
