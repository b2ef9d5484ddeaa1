use std::io::{self, ErrorKind};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;

use bytes::BytesMut;
use tracing::{debug, info};

use crate::codec::{decode_frame, encode_frame, DATA_UNI_LENGTH};
use crate::config::{LinkConfig, LinkMode, Port};
use crate::error::{LinkError, Result};

/// A datagram-oriented descriptor that carries whole link frames.
///
/// Production links use [`PacketSocket`]; any other datagram socket (e.g. a
/// `UnixDatagram` pair) can stand in for a radio adapter.
pub trait RawChannel: AsRawFd {
    /// Receive one datagram.
    fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<usize>;
    /// Send one datagram.
    fn send_datagram(&self, buf: &[u8]) -> io::Result<usize>;
}

impl RawChannel for UnixDatagram {
    fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }

    fn send_datagram(&self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)
    }
}

#[cfg(target_os = "linux")]
pub use packet::PacketSocket;

#[cfg(target_os = "linux")]
mod packet {
    use std::ffi::CString;
    use std::io;
    use std::mem::size_of;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

    use super::RawChannel;
    use crate::error::{LinkError, Result};

    /// AF_PACKET raw socket bound to one network interface.
    #[derive(Debug)]
    pub struct PacketSocket {
        fd: OwnedFd,
        ifindex: u32,
    }

    impl PacketSocket {
        /// Open a raw socket on `adapter`. Requires `CAP_NET_RAW`.
        pub fn bind(adapter: &str) -> Result<Self> {
            let not_found = || LinkError::AdapterNotFound {
                adapter: adapter.to_string(),
            };
            let c_name = CString::new(adapter).map_err(|_| not_found())?;

            // SAFETY: c_name is a valid NUL-terminated string.
            let ifindex = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
            if ifindex == 0 {
                return Err(not_found());
            }

            let protocol = (libc::ETH_P_ALL as u16).to_be();
            // SAFETY: plain socket(2) call; the result is checked before use.
            let raw = unsafe {
                libc::socket(
                    libc::AF_PACKET,
                    libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                    libc::c_int::from(protocol),
                )
            };
            if raw < 0 {
                return Err(LinkError::Open {
                    adapter: adapter.to_string(),
                    source: io::Error::last_os_error(),
                });
            }
            // SAFETY: raw is a freshly created descriptor owned by nobody else.
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };

            // SAFETY: zeroed sockaddr_ll is a valid starting value.
            let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
            addr.sll_family = libc::AF_PACKET as libc::c_ushort;
            addr.sll_protocol = protocol;
            addr.sll_ifindex = ifindex as libc::c_int;

            // SAFETY: addr is a fully initialised sockaddr_ll and the length
            // passed matches its size.
            let rc = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    (&addr as *const libc::sockaddr_ll).cast::<libc::sockaddr>(),
                    size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if rc == -1 {
                return Err(LinkError::Open {
                    adapter: adapter.to_string(),
                    source: io::Error::last_os_error(),
                });
            }

            Ok(Self { fd, ifindex })
        }

        /// Kernel interface index the socket is bound to.
        pub fn ifindex(&self) -> u32 {
            self.ifindex
        }
    }

    impl AsRawFd for PacketSocket {
        fn as_raw_fd(&self) -> RawFd {
            self.fd.as_raw_fd()
        }
    }

    impl RawChannel for PacketSocket {
        fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<usize> {
            // SAFETY: buf is valid for writes of buf.len() bytes.
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    0,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(n as usize)
        }

        fn send_datagram(&self, buf: &[u8]) -> io::Result<usize> {
            // SAFETY: buf is valid for reads of buf.len() bytes.
            let n = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    buf.as_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    0,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(n as usize)
        }
    }
}

/// One frame received from a link, borrowed from the caller's buffer.
#[derive(Debug)]
pub struct Received<'a> {
    pub payload: &'a [u8],
    pub seq: u8,
    /// Bytes of framing stripped before the payload.
    pub header_len: usize,
}

/// A duplex link socket on one physical adapter.
///
/// No failover happens here; combining several links is the caller's job.
pub struct LinkSocket<C: RawChannel> {
    channel: C,
    adapter: String,
    config: LinkConfig,
    tx_buf: BytesMut,
}

#[cfg(target_os = "linux")]
impl LinkSocket<PacketSocket> {
    /// Open a raw link on the named adapter.
    pub fn open(adapter: &str, config: LinkConfig) -> Result<Self> {
        if config.mode != LinkMode::Monitor {
            return Err(LinkError::UnsupportedMode(config.mode));
        }
        let channel = PacketSocket::bind(adapter)?;
        info!(
            adapter,
            comm_id = config.comm_id,
            port = config.port as u8,
            "opened raw link socket"
        );
        Ok(Self::with_channel(adapter, channel, config))
    }
}

impl<C: RawChannel> LinkSocket<C> {
    /// Wrap an already-open datagram channel.
    pub fn with_channel(adapter: impl Into<String>, channel: C, config: LinkConfig) -> Self {
        Self {
            channel,
            adapter: adapter.into(),
            config,
            tx_buf: BytesMut::with_capacity(DATA_UNI_LENGTH),
        }
    }

    /// Receive and unwrap one frame into `buf`.
    ///
    /// Socket failures are returned, not retried.
    pub fn receive<'a>(&self, buf: &'a mut [u8]) -> Result<Received<'a>> {
        let len = loop {
            match self.channel.recv_datagram(buf) {
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(LinkError::Io(err)),
            }
        };

        let frame = decode_frame(&buf[..len], &self.config)?;
        let range = frame.payload_range();
        Ok(Received {
            payload: &buf[range],
            seq: frame.seq,
            header_len: frame.header_len,
        })
    }

    /// Frame and transmit one payload with a caller-assigned sequence number.
    pub fn send(&mut self, port: Port, payload: &[u8], seq: u8) -> Result<()> {
        self.tx_buf.clear();
        encode_frame(&self.config, port, payload, seq, &mut self.tx_buf)?;

        let written = self.channel.send_datagram(&self.tx_buf)?;
        if written != self.tx_buf.len() {
            return Err(LinkError::ShortSend {
                adapter: self.adapter.clone(),
                written,
                expected: self.tx_buf.len(),
            });
        }
        debug!(adapter = %self.adapter, seq, len = payload.len(), "sent link frame");
        Ok(())
    }

    /// Adapter name this socket was opened on.
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    /// Link configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Borrow the underlying channel.
    pub fn get_ref(&self) -> &C {
        &self.channel
    }
}

impl<C: RawChannel> AsRawFd for LinkSocket<C> {
    fn as_raw_fd(&self) -> RawFd {
        self.channel.as_raw_fd()
    }
}

impl<C: RawChannel> std::fmt::Debug for LinkSocket<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSocket")
            .field("adapter", &self.adapter)
            .field("fd", &self.channel.as_raw_fd())
            .finish()
    }
}
