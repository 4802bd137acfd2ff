//! I/O layer - line-oriented channels and their multiplexing
//!
//! - **LineReader**: buffered, terminator-normalizing line framing over any reader
//! - **ProcessChannel**: a spawned child with stdin and two line-read outputs
//! - **Selector**: timed readiness wait across many process channels
//! - **SocketChannel**: exact-length timed transfers over TCP
//!
//! Readiness is provided by a platform [`backend`]; both backends honor the
//! same observable contract.

pub mod backend;
pub mod event;
pub mod line_reader;
pub mod process;
pub mod selector;
pub mod socket;
pub mod threaded;

// Re-export main types for convenience
pub use backend::{Backend, MAX_WAIT_HANDLES, PlatformBackend, ThreadBackend, WaitSet};
#[cfg(unix)]
pub use backend::PollBackend;
pub use line_reader::{Line, LineReader, LineSource, MAX_LINE_LEN};
pub use process::{ChildPipe, ProcessChannel, StreamKind};
pub use selector::{Ready, SELECTOR_CAPACITY, Selector, StreamState};
pub use socket::SocketChannel;
pub use threaded::ThreadedLineReader;
