//! `poll(2)`-based readiness for unix pipes

use std::io;
use std::os::fd::AsRawFd;
use std::time::Duration;

use tracing::trace;

use super::{Backend, WaitSet};
use crate::error::FatalError;
use crate::io::line_reader::LineReader;
use crate::io::process::ChildPipe;
use crate::timeout::Timeout;

/// Streams are read in place; readiness comes from the pipe descriptors
#[derive(Debug)]
pub enum PollBackend {}

impl Backend for PollBackend {
    type Stream = LineReader<ChildPipe>;
    type WaitSet = PollWaitSet;

    const NAME: &'static str = "poll";

    fn attach(pipe: ChildPipe) -> Result<Self::Stream, FatalError> {
        Ok(LineReader::new(pipe))
    }
}

/// Wait set over raw pipe descriptors
#[derive(Debug, Default)]
pub struct PollWaitSet {
    fds: Vec<libc::pollfd>,
}

impl PollWaitSet {
    /// Events that mean a read will not block: data, hang-up or error
    const READABLE: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR;
}

impl WaitSet for PollWaitSet {
    type Stream = LineReader<ChildPipe>;

    fn clear(&mut self) {
        self.fds.clear();
    }

    fn register(&mut self, stream: &Self::Stream) -> usize {
        self.fds.push(libc::pollfd {
            fd: stream.get_ref().as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        self.fds.len() - 1
    }

    fn len(&self) -> usize {
        self.fds.len()
    }

    fn wait(&mut self, timeout: Timeout) -> Result<bool, FatalError> {
        for pfd in &mut self.fds {
            pfd.revents = 0;
        }
        if self.fds.is_empty() {
            std::thread::sleep(Duration::from(timeout));
            return Ok(false);
        }

        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout.as_poll_millis(),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            // A signal cut the wait short; report it as a timeout
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("PollWaitSet: poll interrupted");
                return Ok(false);
            }
            return Err(FatalError::os("poll", err));
        }

        if self.fds.iter().any(|pfd| pfd.revents & libc::POLLNVAL != 0) {
            return Err(FatalError::os(
                "poll",
                io::Error::from_raw_os_error(libc::EBADF),
            ));
        }

        trace!("PollWaitSet: {} of {} descriptors ready", n, self.fds.len());
        Ok(n > 0)
    }

    fn poll(&self, token: usize) -> bool {
        self.fds
            .get(token)
            .is_some_and(|pfd| pfd.revents & Self::READABLE != 0)
    }
}
