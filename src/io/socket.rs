//! Timed, exact-length transfers over a TCP connection
//!
//! Every chunk is preceded by a readiness wait bounded by the caller's
//! timeout. A wait that expires is reported as a recoverable
//! [`TransferError::Timeout`]; a peer that hangs up during `recv` as
//! [`TransferError::ConnectionClosed`]. Construction problems are fatal.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};

use tracing::{debug, trace};

use crate::error::{Direction, FatalError, TransferError};
use crate::timeout::Timeout;

/// A connected stream socket to one IPv4 peer
#[derive(Debug)]
pub struct SocketChannel {
    stream: TcpStream,
    peer: SocketAddrV4,
}

impl SocketChannel {
    /// Resolve a dotted-quad address and connect, blocking until done
    pub fn connect(address: &str, port: u16) -> Result<Self, FatalError> {
        let ip: Ipv4Addr = address
            .parse()
            .map_err(|_| FatalError::BadAddress(address.to_string()))?;
        let peer = SocketAddrV4::new(ip, port);

        let stream = TcpStream::connect(peer).map_err(|source| FatalError::Connect {
            addr: peer,
            source,
        })?;
        #[cfg(unix)]
        stream
            .set_nonblocking(true)
            .map_err(|e| FatalError::os("fcntl", e))?;

        debug!("SocketChannel: connected to {}", peer);
        Ok(Self { stream, peer })
    }

    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    /// Send all of `buf` in chunks of at most `chunk_size` bytes
    pub fn send(&self, buf: &[u8], timeout: Timeout, chunk_size: usize) -> Result<(), TransferError> {
        check_transfer_args(timeout, chunk_size)?;

        let mut sent = 0;
        while sent < buf.len() {
            if !self.ready(Direction::Send, timeout)? {
                return Err(TransferError::Timeout {
                    direction: Direction::Send,
                    transferred: sent,
                    expected: buf.len(),
                });
            }

            let end = buf.len().min(sent + chunk_size);
            match (&self.stream).write(&buf[sent..end]) {
                Ok(0) => {
                    return Err(FatalError::os("send", io::ErrorKind::WriteZero.into()).into());
                }
                Ok(n) => {
                    sent += n;
                    trace!("SocketChannel: sent {} bytes ({}/{})", n, sent, buf.len());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => {
                    if !cfg!(unix) {
                        return Err(TransferError::Timeout {
                            direction: Direction::Send,
                            transferred: sent,
                            expected: buf.len(),
                        });
                    }
                }
                Err(e) => return Err(FatalError::os("send", e).into()),
            }
        }
        Ok(())
    }

    /// Fill all of `buf` in chunks of at most `chunk_size` bytes
    pub fn recv(&self, buf: &mut [u8], timeout: Timeout, chunk_size: usize) -> Result<(), TransferError> {
        check_transfer_args(timeout, chunk_size)?;

        let expected = buf.len();
        let mut received = 0;
        while received < expected {
            if !self.ready(Direction::Recv, timeout)? {
                return Err(TransferError::Timeout {
                    direction: Direction::Recv,
                    transferred: received,
                    expected,
                });
            }

            let end = expected.min(received + chunk_size);
            match (&self.stream).read(&mut buf[received..end]) {
                Ok(0) => {
                    debug!(
                        "SocketChannel: {} closed the connection after {} of {} bytes",
                        self.peer, received, expected
                    );
                    return Err(TransferError::ConnectionClosed { received, expected });
                }
                Ok(n) => {
                    received += n;
                    trace!("SocketChannel: received {} bytes ({}/{})", n, received, expected);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => {
                    if !cfg!(unix) {
                        return Err(TransferError::Timeout {
                            direction: Direction::Recv,
                            transferred: received,
                            expected,
                        });
                    }
                }
                Err(e) => return Err(FatalError::os("recv", e).into()),
            }
        }
        Ok(())
    }

    /// Wait up to `timeout` for the socket to accept or deliver bytes
    #[cfg(unix)]
    fn ready(&self, direction: Direction, timeout: Timeout) -> Result<bool, FatalError> {
        use std::os::fd::AsRawFd;
        use std::time::Instant;

        let events = match direction {
            Direction::Send => libc::POLLOUT,
            Direction::Recv => libc::POLLIN,
        };
        let mut pfd = libc::pollfd {
            fd: self.stream.as_raw_fd(),
            events,
            revents: 0,
        };

        let deadline = Instant::now() + timeout.as_duration();
        let mut remaining = timeout;
        loop {
            let n = unsafe { libc::poll(&mut pfd, 1, remaining.as_poll_millis()) };
            if n >= 0 {
                return Ok(n > 0);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(FatalError::os("poll", err));
            }
            let left = deadline.saturating_duration_since(Instant::now());
            remaining = Timeout::from_millis(left.as_millis() as u64);
        }
    }

    /// Blocking socket options stand in for the readiness wait
    #[cfg(not(unix))]
    fn ready(&self, direction: Direction, timeout: Timeout) -> Result<bool, FatalError> {
        let limit = Some(timeout.as_duration());
        let set = match direction {
            Direction::Send => self.stream.set_write_timeout(limit),
            Direction::Recv => self.stream.set_read_timeout(limit),
        };
        set.map_err(|e| FatalError::os("setsockopt", e))?;
        Ok(true)
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        debug!("SocketChannel: closing connection to {}", self.peer);
    }
}

fn check_transfer_args(timeout: Timeout, chunk_size: usize) -> Result<(), FatalError> {
    if chunk_size == 0 {
        return Err(FatalError::InvalidArgument("chunk size must be positive".into()));
    }
    if timeout.is_zero() {
        return Err(FatalError::InvalidArgument("socket timeout must be positive".into()));
    }
    Ok(())
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
