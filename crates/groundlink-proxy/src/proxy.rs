//! The ground-side diversity multiplexer.

use std::io;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use groundlink_link::{
    LinkError, LinkSocket, Port, RawChannel, SeqCounter, DATA_UNI_LENGTH, MAX_PAYLOAD,
};
use tracing::{debug, info, trace, warn};

use crate::cancel::CancelToken;
use crate::config::ProxyConfig;
use crate::dedup::DiversityFilter;
use crate::error::{ProxyError, Result};
use crate::fanout::{Admission, ClientRead, FanoutServer};
use crate::overlay::OverlaySink;
use crate::poller::{PollSet, Token};
use crate::telemetry_log::{LogDisposition, TelemetryLog};

/// Pause after a failed readiness wait before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle of a [`Proxy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Running,
    ShuttingDown,
    Stopped,
}

/// Counters maintained by the event loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// Frames delivered to the sinks.
    pub accepted: u64,
    /// Frames dropped as copies of an already delivered frame.
    pub duplicates: u64,
    /// Frames addressed to another session, port or direction.
    pub foreign: u64,
    /// Receive failures and malformed frames.
    pub link_errors: u64,
    /// Client messages transmitted on the links.
    pub uplinked: u64,
}

/// Summary produced by [`Proxy::shutdown`].
#[derive(Debug)]
pub struct ShutdownReport {
    pub stats: ProxyStats,
    pub links_closed: usize,
    pub clients_closed: usize,
    /// `None` if no telemetry log was open or closing it failed.
    pub log: Option<LogDisposition>,
}

/// Deduplicates downlink frames from several adapters and fans them out to
/// TCP clients, the telemetry log and the overlay; sends client data back
/// out on every adapter.
pub struct Proxy<C: RawChannel> {
    links: Vec<LinkSocket<C>>,
    fanout: FanoutServer,
    telemetry: Option<TelemetryLog>,
    overlay: Option<OverlaySink>,
    filter: DiversityFilter,
    uplink_seq: SeqCounter,
    uplink_port: Port,
    poll_timeout: Duration,
    poll_set: PollSet,
    link_buf: Vec<u8>,
    client_buf: Vec<u8>,
    state: ProxyState,
    stats: ProxyStats,
}

#[cfg(target_os = "linux")]
impl Proxy<groundlink_link::PacketSocket> {
    /// Open every configured adapter and sink.
    ///
    /// Link and listener failures are fatal; log and overlay failures only
    /// disable that sink.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let mut links = Vec::with_capacity(config.adapters.len());
        for adapter in config.adapters.iter().take(groundlink_link::MAX_ADAPTERS) {
            links.push(LinkSocket::open(adapter, config.link.clone())?);
        }
        if config.adapters.len() > groundlink_link::MAX_ADAPTERS {
            warn!(
                requested = config.adapters.len(),
                max = groundlink_link::MAX_ADAPTERS,
                "ignoring adapters beyond the supported maximum"
            );
        }

        let overlay = config.overlay.as_ref().and_then(OverlaySink::open);
        let fanout = FanoutServer::bind(config.listen_addr, config.max_clients)?;
        let mut proxy = Self::new(links, fanout, config);
        if let Some(sink) = overlay {
            proxy = proxy.with_overlay(sink);
        }
        if let Some(dir) = &config.log_dir {
            match TelemetryLog::create(dir) {
                Ok(log) => proxy = proxy.with_telemetry_log(log),
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "telemetry log unavailable, continuing without it");
                }
            }
        }
        Ok(proxy)
    }
}

impl<C: RawChannel> Proxy<C> {
    /// Assemble a proxy from already-open links and listener.
    pub fn new(links: Vec<LinkSocket<C>>, fanout: FanoutServer, config: &ProxyConfig) -> Self {
        let capacity = links.len() + 1 + fanout.capacity();
        Self {
            links,
            fanout,
            telemetry: None,
            overlay: None,
            filter: DiversityFilter::new(),
            uplink_seq: SeqCounter::default(),
            uplink_port: config.uplink_port,
            poll_timeout: config.poll_timeout,
            poll_set: PollSet::with_capacity(capacity),
            link_buf: vec![0; DATA_UNI_LENGTH],
            client_buf: vec![0; MAX_PAYLOAD],
            state: ProxyState::Running,
            stats: ProxyStats::default(),
        }
    }

    pub fn with_telemetry_log(mut self, log: TelemetryLog) -> Self {
        self.telemetry = Some(log);
        self
    }

    pub fn with_overlay(mut self, sink: OverlaySink) -> Self {
        self.overlay = Some(sink);
        self
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    pub fn stats(&self) -> ProxyStats {
        self.stats
    }

    pub fn fanout(&self) -> &FanoutServer {
        &self.fanout
    }

    pub fn links(&self) -> &[LinkSocket<C>] {
        &self.links
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.fanout.local_addr()
    }

    /// Path of the open telemetry log, if any.
    pub fn telemetry_path(&self) -> Option<&std::path::Path> {
        self.telemetry.as_ref().map(TelemetryLog::path)
    }

    /// Serve until `cancel` is set, then shut down.
    ///
    /// Individual I/O failures are logged and the loop continues.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<ShutdownReport> {
        if self.state != ProxyState::Running {
            return Err(ProxyError::NotRunning);
        }
        info!(
            adapters = self.links.len(),
            max_clients = self.fanout.capacity(),
            "proxy running"
        );
        while !cancel.is_cancelled() {
            if let Err(err) = self.poll_once() {
                warn!(error = %err, "proxy iteration failed");
                thread::sleep(POLL_ERROR_BACKOFF);
            }
        }
        info!("shutdown requested");
        Ok(self.shutdown())
    }

    /// Wait for readiness once and service every ready descriptor: links
    /// first, then the listener, then clients.
    ///
    /// Returns the number of ready descriptors; zero means the wait timed out.
    pub fn poll_once(&mut self) -> Result<usize> {
        if self.state != ProxyState::Running {
            return Err(ProxyError::NotRunning);
        }

        self.poll_set.clear();
        for (index, link) in self.links.iter().enumerate() {
            self.poll_set.register(Token::Link(index), link);
        }
        self.fanout.register(&mut self.poll_set);

        let ready = self.poll_set.wait(self.poll_timeout).map_err(ProxyError::Poll)?;
        if ready == 0 {
            self.flush_log();
            return Ok(0);
        }

        for index in 0..self.poll_set.len() {
            match self.poll_set.ready_at(index) {
                Some(Token::Link(link)) => self.service_link(link),
                Some(Token::Listener) => self.service_listener(),
                Some(Token::Client(slot)) => self.service_client(slot),
                Some(Token::Backlog(slot)) => self.fanout.flush_backlog(slot),
                None => {}
            }
        }
        Ok(ready)
    }

    /// Close every descriptor and sink. Idempotent.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.state == ProxyState::Stopped {
            return ShutdownReport {
                stats: self.stats,
                links_closed: 0,
                clients_closed: 0,
                log: None,
            };
        }
        self.state = ProxyState::ShuttingDown;

        let links_closed = self.links.len();
        self.links.clear();
        let clients_closed = self.fanout.close();
        self.overlay = None;
        let log = self.telemetry.take().and_then(|log| match log.close() {
            Ok(disposition) => Some(disposition),
            Err(err) => {
                warn!(error = %err, "closing telemetry log failed");
                None
            }
        });

        self.state = ProxyState::Stopped;
        info!(
            accepted = self.stats.accepted,
            duplicates = self.stats.duplicates,
            uplinked = self.stats.uplinked,
            links_closed,
            clients_closed,
            "proxy stopped"
        );
        ShutdownReport {
            stats: self.stats,
            links_closed,
            clients_closed,
            log,
        }
    }

    fn service_link(&mut self, index: usize) {
        let Some(link) = self.links.get(index) else {
            return;
        };
        let received = match link.receive(&mut self.link_buf) {
            Ok(received) => received,
            Err(LinkError::ForeignFrame { comm_id, port, direction }) => {
                self.stats.foreign += 1;
                trace!(adapter = link.adapter(), comm_id, port, direction, "ignoring foreign frame");
                return;
            }
            Err(err) => {
                self.stats.link_errors += 1;
                warn!(adapter = link.adapter(), error = %err, "link receive failed");
                return;
            }
        };

        if !self.filter.accept(received.seq) {
            self.stats.duplicates += 1;
            trace!(adapter = link.adapter(), seq = received.seq, "duplicate frame");
            return;
        }
        self.stats.accepted += 1;
        trace!(adapter = link.adapter(), seq = received.seq, len = received.payload.len(), "accepted frame");

        let payload = received.payload;
        if let Some(log) = self.telemetry.as_mut().filter(|log| !log.is_failed()) {
            // The log reports its own failure.
            let _ = log.append(payload);
        }
        self.fanout.broadcast(payload);
        if let Some(sink) = self.overlay.as_mut() {
            match sink.write(payload) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    debug!("overlay reader lagging, payload dropped");
                }
                Err(err) => warn!(error = %err, "overlay write failed"),
            }
        }
    }

    fn service_listener(&mut self) {
        match self.fanout.accept() {
            Ok(Admission::Admitted { .. } | Admission::Rejected { .. } | Admission::Pending) => {}
            Err(err) => warn!(error = %err, "accepting TCP client failed"),
        }
    }

    fn service_client(&mut self, slot: usize) {
        let len = match self.fanout.read_from(slot, &mut self.client_buf) {
            ClientRead::Data(len) => len,
            ClientRead::Closed | ClientRead::Pending => return,
        };

        let seq = self.uplink_seq.advance();
        let payload = &self.client_buf[..len];
        for link in &mut self.links {
            if let Err(err) = link.send(self.uplink_port, payload, seq) {
                warn!(adapter = link.adapter(), seq, error = %err, "uplink send failed");
            }
        }
        self.stats.uplinked += 1;
        debug!(slot, seq, len, "uplinked client data");
    }

    fn flush_log(&mut self) {
        if let Some(log) = self.telemetry.as_mut().filter(|log| !log.is_failed()) {
            let _ = log.flush();
        }
    }
}

impl<C: RawChannel> Drop for Proxy<C> {
    fn drop(&mut self) {
        if self.state != ProxyState::Stopped {
            self.shutdown();
        }
    }
}

impl<C: RawChannel> std::fmt::Debug for Proxy<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("links", &self.links)
            .field("fanout", &self.fanout)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}
