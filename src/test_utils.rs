//! Test utilities and global setup
//!
//! Provides centralized test logging configuration, a scripted reader for
//! exercising line framing without real pipes, and shell-child helpers.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// # Environment Variables
    ///
    /// - `RUST_LOG`: Controls log level (default: "debug")
    ///
    /// ```bash
    /// RUST_LOG=linemux::io::selector=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true) // reader threads show up in thread-backed tests
                .compact()
                .try_init()
                .ok();
        });
    }
}

/// Auto-initialize test logging for every test in the including module
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

use std::collections::VecDeque;
use std::io::{self, Read};

use crate::io::{Backend, ProcessChannel};

/// Reader that hands out pre-scripted chunks, one per `read` call
///
/// A chunk larger than the caller's buffer is split and the rest is served
/// by the next call. After the script runs out the reader reports end of
/// stream, or an error when built with [`ScriptedReader::failing_after`].
#[derive(Debug)]
pub struct ScriptedReader {
    chunks: VecDeque<Vec<u8>>,
    fail_at_end: bool,
}

impl ScriptedReader {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            fail_at_end: false,
        }
    }

    pub fn failing_after(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            fail_at_end: true,
        }
    }
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(mut chunk) = self.chunks.pop_front() else {
            if self.fail_at_end {
                return Err(io::Error::other("scripted read failure"));
            }
            return Ok(0);
        };
        if chunk.len() > buf.len() {
            let rest = chunk.split_off(buf.len());
            self.chunks.push_front(rest);
        }
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

/// Spawn `/bin/sh -c <script>` on the given backend
pub fn sh<B: Backend>(script: &str) -> ProcessChannel<B> {
    ProcessChannel::open("/bin/sh", &["sh", "-c", script]).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_reader_splits_large_chunks() {
        let mut reader = ScriptedReader::new(vec![b"abcdef".to_vec()]);
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_scripted_reader_failure() {
        let mut reader = ScriptedReader::failing_after(vec![]);
        let mut buf = [0u8; 4];
        assert!(reader.read(&mut buf).is_err());
    }
}

#[cfg(all(test, feature = "test-logging"))]
crate::setup_test_logging!();
