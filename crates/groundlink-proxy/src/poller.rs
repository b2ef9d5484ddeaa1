//! Readiness multiplexing over link sockets, the TCP listener and clients.

use std::io;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Identifies what a registered descriptor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Link socket by adapter index.
    Link(usize),
    Listener,
    /// TCP client by slot index.
    Client(usize),
    /// TCP client with unsent bytes, watched for writability.
    Backlog(usize),
}

const READY: libc::c_short = libc::POLLIN | libc::POLLOUT | libc::POLLERR | libc::POLLHUP;

/// A `poll(2)` interest set rebuilt every iteration.
///
/// Ready tokens are reported in registration order.
#[derive(Debug, Default)]
pub struct PollSet {
    fds: Vec<libc::pollfd>,
    tokens: Vec<Token>,
}

impl PollSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity),
            tokens: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.fds.clear();
        self.tokens.clear();
    }

    /// Watch `source` for readability.
    pub fn register(&mut self, token: Token, source: &impl AsRawFd) {
        self.push(token, source, libc::POLLIN);
    }

    /// Watch `source` for writability.
    pub fn register_writable(&mut self, token: Token, source: &impl AsRawFd) {
        self.push(token, source, libc::POLLOUT);
    }

    fn push(&mut self, token: Token, source: &impl AsRawFd, events: libc::c_short) {
        self.fds.push(libc::pollfd {
            fd: source.as_raw_fd(),
            events,
            revents: 0,
        });
        self.tokens.push(token);
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Block until a descriptor is ready or `timeout` elapses.
    ///
    /// Returns the number of ready descriptors. An interrupted wait counts
    /// as a timeout.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<usize> {
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: fds points to fds.len() initialised pollfd entries that
        // stay alive for the duration of the call.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(rc as usize)
    }

    /// Token at `index` if its descriptor reported the readiness it was
    /// registered for (or an error) in the last wait.
    pub fn ready_at(&self, index: usize) -> Option<Token> {
        let fd = self.fds.get(index)?;
        if fd.revents & READY != 0 {
            Some(self.tokens[index])
        } else {
            None
        }
    }

    /// All ready tokens from the last wait, in registration order.
    pub fn ready(&self) -> impl Iterator<Item = Token> + '_ {
        (0..self.len()).filter_map(|i| self.ready_at(i))
    }
}
