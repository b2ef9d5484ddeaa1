//! TCP fan-out server with a fixed number of client slots.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};
use crate::poller::{PollSet, Token};

/// Outcome of servicing a readable listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Placed in the lowest free slot.
    Admitted { slot: usize, peer: SocketAddr },
    /// Every slot was occupied; the connection was closed.
    Rejected { peer: SocketAddr },
    /// Nothing to accept.
    Pending,
}

/// Outcome of servicing a readable client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRead {
    /// Bytes read into the caller's buffer.
    Data(usize),
    /// The client disconnected or failed; its slot is free again.
    Closed,
    /// Nothing to read (spurious wakeup or empty slot).
    Pending,
}

#[derive(Debug)]
struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    /// Unsent tail of the last payload. Holds at most one payload.
    backlog: Vec<u8>,
}

impl Client {
    /// Write as much of the backlog as the socket takes without blocking.
    fn drain_backlog(&mut self) -> io::Result<()> {
        while !self.backlog.is_empty() {
            match self.stream.write(&self.backlog) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => {
                    self.backlog.drain(..n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Non-blocking TCP listener plus up to `capacity` connected clients.
#[derive(Debug)]
pub struct FanoutServer {
    listener: Option<TcpListener>,
    slots: Vec<Option<Client>>,
}

impl FanoutServer {
    pub fn bind(addr: SocketAddr, capacity: usize) -> Result<Self> {
        let bind_err = |source| ProxyError::Bind { addr, source };
        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        info!(addr = %addr, capacity, "TCP fan-out listening");

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            listener: Some(listener),
            slots,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => Err(io::Error::new(ErrorKind::NotConnected, "listener closed")),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn client_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Peer address of the client in `slot`, if occupied.
    pub fn slot_peer(&self, slot: usize) -> Option<SocketAddr> {
        self.slots.get(slot)?.as_ref().map(|c| c.peer)
    }

    /// Bytes queued for slow clients across all slots.
    pub fn backlog_len(&self) -> usize {
        self.slots.iter().flatten().map(|c| c.backlog.len()).sum()
    }

    /// Register the listener and every occupied slot. Clients with a
    /// backlog are also watched for writability.
    pub fn register(&self, set: &mut PollSet) {
        if let Some(listener) = &self.listener {
            set.register(Token::Listener, listener);
        }
        for (slot, client) in self.slots.iter().enumerate() {
            if let Some(client) = client {
                set.register(Token::Client(slot), &client.stream);
                if !client.backlog.is_empty() {
                    set.register_writable(Token::Backlog(slot), &client.stream);
                }
            }
        }
    }

    /// Accept one pending connection.
    pub fn accept(&mut self) -> io::Result<Admission> {
        let Some(listener) = &self.listener else {
            return Ok(Admission::Pending);
        };
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(Admission::Pending),
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(Admission::Pending),
            Err(err) => return Err(err),
        };

        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            warn!(peer = %peer, capacity = self.capacity(), "client capacity reached, dropping connection");
            return Ok(Admission::Rejected { peer });
        };

        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        self.slots[slot] = Some(Client {
            stream,
            peer,
            backlog: Vec::new(),
        });
        info!(peer = %peer, slot, "TCP client connected");
        Ok(Admission::Admitted { slot, peer })
    }

    /// Read whatever the client in `slot` has sent.
    pub fn read_from(&mut self, slot: usize, buf: &mut [u8]) -> ClientRead {
        let Some(Some(client)) = self.slots.get_mut(slot) else {
            return ClientRead::Pending;
        };
        match client.stream.read(buf) {
            Ok(0) => {
                info!(peer = %client.peer, slot, "TCP client disconnected");
                self.slots[slot] = None;
                ClientRead::Closed
            }
            Ok(n) => ClientRead::Data(n),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                ClientRead::Pending
            }
            Err(err) => {
                warn!(peer = %client.peer, slot, error = %err, "TCP client read failed, closing");
                self.slots[slot] = None;
                ClientRead::Closed
            }
        }
    }

    /// Send `payload` to every connected client without blocking.
    ///
    /// Clients only ever see whole payloads. When the socket takes part of a
    /// payload, the rest is queued and finished before anything new is sent
    /// to that client. A client that is still draining an earlier tail, or
    /// whose send buffer is full, misses this payload. A client whose
    /// connection failed is closed. Returns the number of clients that took
    /// or queued the whole payload.
    pub fn broadcast(&mut self, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            let Some(client) = entry else { continue };
            if let Err(err) = client.drain_backlog() {
                info!(peer = %client.peer, slot, error = %err, "TCP client send failed, closing");
                *entry = None;
                continue;
            }
            if !client.backlog.is_empty() {
                debug!(peer = %client.peer, slot, backlog = client.backlog.len(), "client still draining, payload dropped");
                continue;
            }
            match client.stream.write(payload) {
                Ok(n) if n == payload.len() => delivered += 1,
                Ok(n) => {
                    client.backlog.extend_from_slice(&payload[n..]);
                    delivered += 1;
                    debug!(peer = %client.peer, slot, written = n, len = payload.len(), "queued payload tail for slow client");
                }
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                    debug!(peer = %client.peer, slot, "client not keeping up, payload dropped");
                }
                Err(err) => {
                    info!(peer = %client.peer, slot, error = %err, "TCP client send failed, closing");
                    *entry = None;
                }
            }
        }
        delivered
    }

    /// Continue sending the queued tail to the client in `slot`.
    pub fn flush_backlog(&mut self, slot: usize) {
        let Some(Some(client)) = self.slots.get_mut(slot) else {
            return;
        };
        if let Err(err) = client.drain_backlog() {
            info!(peer = %client.peer, slot, error = %err, "TCP client send failed, closing");
            self.slots[slot] = None;
        }
    }

    /// Close every client and the listener. Returns the number of clients closed.
    pub fn close(&mut self) -> usize {
        let closed = self.slots.iter_mut().filter_map(Option::take).count();
        self.listener = None;
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    fn loopback(capacity: usize) -> FanoutServer {
        FanoutServer::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), capacity)
            .expect("loopback bind should succeed")
    }

    fn accept_one(server: &mut FanoutServer) -> Admission {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match server.accept().expect("accept should not fail") {
                Admission::Pending if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                other => return other,
            }
        }
    }

    #[test]
    fn bind_reports_address_in_use() {
        let first = loopback(1);
        let addr = first.local_addr().unwrap();
        let err = FanoutServer::bind(addr, 1).expect_err("second bind should fail");
        assert!(matches!(err, ProxyError::Bind { .. }));
    }

    #[test]
    fn clients_fill_lowest_free_slot() {
        let mut server = loopback(2);
        let addr = server.local_addr().unwrap();

        let _c0 = TcpStream::connect(addr).unwrap();
        assert!(matches!(accept_one(&mut server), Admission::Admitted { slot: 0, .. }));
        let c1 = TcpStream::connect(addr).unwrap();
        assert!(matches!(accept_one(&mut server), Admission::Admitted { slot: 1, .. }));
        assert_eq!(server.client_count(), 2);

        let _c2 = TcpStream::connect(addr).unwrap();
        assert!(matches!(accept_one(&mut server), Admission::Rejected { .. }));
        assert_eq!(server.client_count(), 2);

        drop(c1);
        let mut buf = [0u8; 16];
        let deadline = Instant::now() + Duration::from_secs(2);
        while server.read_from(1, &mut buf) != ClientRead::Closed {
            assert!(Instant::now() < deadline, "disconnect should be observed");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(server.slot_peer(1), None);

        let c3 = TcpStream::connect(addr).unwrap();
        match accept_one(&mut server) {
            Admission::Admitted { slot, peer } => {
                assert_eq!(slot, 1);
                assert_eq!(peer, c3.local_addr().unwrap());
            }
            other => panic!("expected admission, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_reaches_every_client() {
        let mut server = loopback(4);
        let addr = server.local_addr().unwrap();
        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(TcpStream::connect(addr).unwrap());
            accept_one(&mut server);
        }

        assert_eq!(server.broadcast(b"telemetry"), 3);
        for client in &mut clients {
            client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            let mut buf = [0u8; 9];
            client.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"telemetry");
        }
    }

    #[test]
    fn slow_client_only_sees_whole_payloads() {
        let mut server = loopback(1);
        let addr = server.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        accept_one(&mut server);

        let payload = [0xAB; 1000];
        for _ in 0..20_000 {
            server.broadcast(&payload);
        }
        assert!(server.backlog_len() <= payload.len());

        let reader = std::thread::spawn(move || {
            client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let mut received = Vec::new();
            client.read_to_end(&mut received).unwrap();
            received
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while server.backlog_len() > 0 {
            assert!(Instant::now() < deadline, "backlog should drain once the client reads");
            server.flush_backlog(0);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(server.close(), 1);

        let received = reader.join().unwrap();
        assert!(received.len() >= payload.len());
        assert_eq!(received.len() % payload.len(), 0, "a payload was cut short");
        assert!(received.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn queued_tail_is_registered_for_writability() {
        let mut server = loopback(1);
        let addr = server.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        accept_one(&mut server);

        let payload = [0x5A; 1000];
        for _ in 0..20_000 {
            server.broadcast(&payload);
            if server.backlog_len() > 0 {
                break;
            }
        }

        let mut set = PollSet::default();
        server.register(&mut set);
        let expected = if server.backlog_len() > 0 { 3 } else { 2 };
        assert_eq!(set.len(), expected);
    }

    #[test]
    fn close_releases_everything() {
        let mut server = loopback(2);
        let addr = server.local_addr().unwrap();
        let _c = TcpStream::connect(addr).unwrap();
        accept_one(&mut server);

        assert_eq!(server.close(), 1);
        assert_eq!(server.client_count(), 0);
        assert!(server.local_addr().is_err());
        assert_eq!(server.accept().unwrap(), Admission::Pending);
    }
}
