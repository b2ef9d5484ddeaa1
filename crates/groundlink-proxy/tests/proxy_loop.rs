#![cfg(unix)]

use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use groundlink_link::{Direction, LinkConfig, LinkSocket, Port, DATA_UNI_LENGTH};
use groundlink_proxy::{
    CancelToken, FanoutServer, LogDisposition, OverlayConfig, OverlaySink, Proxy, ProxyConfig,
    ProxyState, TelemetryLog,
};

type Link = LinkSocket<UnixDatagram>;

/// Proxy wired to in-process stand-ins for the aircraft's radios.
struct Harness {
    proxy: Proxy<UnixDatagram>,
    air: Vec<Link>,
}

fn config(max_clients: usize) -> ProxyConfig {
    ProxyConfig {
        listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        max_clients,
        poll_timeout: Duration::from_millis(20),
        log_dir: None,
        overlay: None,
        ..ProxyConfig::default()
    }
}

fn harness(adapters: usize, config: &ProxyConfig) -> Harness {
    let mut links = Vec::new();
    let mut air = Vec::new();
    for i in 0..adapters {
        let (ground, aircraft) = UnixDatagram::pair().expect("socketpair should be creatable");
        links.push(LinkSocket::with_channel(format!("gnd{i}"), ground, config.link.clone()));
        air.push(LinkSocket::with_channel(
            format!("air{i}"),
            aircraft,
            LinkConfig {
                direction: Direction::ToGround,
                port: config.uplink_port,
                ..config.link.clone()
            },
        ));
    }
    let fanout = FanoutServer::bind(config.listen_addr, config.max_clients)
        .expect("loopback bind should succeed");
    Harness {
        proxy: Proxy::new(links, fanout, config),
        air,
    }
}

impl Harness {
    fn downlink(&mut self, adapter: usize, payload: &[u8], seq: u8) {
        self.air[adapter]
            .send(Port::Proxy, payload, seq)
            .expect("air side send should succeed");
    }

    /// Poll until an iteration times out with nothing ready.
    fn drain(&mut self) {
        for _ in 0..64 {
            if self.proxy.poll_once().expect("poll should succeed") == 0 {
                return;
            }
        }
        panic!("proxy never went idle");
    }

    fn pump_until(&mut self, what: &str, mut done: impl FnMut(&Proxy<UnixDatagram>) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !done(&self.proxy) {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            self.proxy.poll_once().expect("poll should succeed");
        }
    }

    fn connect(&mut self) -> TcpStream {
        let before = self.proxy.fanout().client_count();
        let client = TcpStream::connect(self.proxy.local_addr().unwrap()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        self.pump_until("client admission", |p| p.fanout().client_count() > before);
        client
    }
}

fn read_available(client: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
            Err(err) => panic!("client read failed: {err}"),
        }
    }
    out
}

#[test]
fn one_frame_on_every_adapter_is_delivered_once() {
    let mut h = harness(3, &config(4));
    let mut client = h.connect();

    for adapter in 0..3 {
        h.downlink(adapter, b"alpha", 1);
    }
    h.drain();
    // The second frame wins on a different adapter this time.
    h.downlink(2, b"bravo", 2);
    h.downlink(0, b"bravo", 2);
    h.drain();

    assert_eq!(read_available(&mut client), b"alphabravo");
    let stats = h.proxy.stats();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.duplicates, 3);
}

#[test]
fn late_copy_after_newer_frame_is_delivered_again() {
    let mut h = harness(2, &config(4));
    let mut client = h.connect();

    h.downlink(0, b"1", 1);
    h.drain();
    h.downlink(0, b"2", 2);
    h.drain();
    h.downlink(1, b"1", 1);
    h.drain();

    assert_eq!(read_available(&mut client), b"121");
}

#[test]
fn foreign_frames_are_ignored() {
    let mut h = harness(1, &config(4));
    let mut client = h.connect();

    h.air[0].send(Port::Video, b"video", 5).unwrap();
    h.drain();

    assert!(read_available(&mut client).is_empty());
    assert_eq!(h.proxy.stats().foreign, 1);
    assert_eq!(h.proxy.stats().accepted, 0);
}

#[test]
fn client_data_goes_out_on_every_adapter_with_one_sequence_number() {
    let mut h = harness(3, &config(4));
    let mut client = h.connect();

    client.write_all(b"arm").unwrap();
    h.pump_until("first uplink", |p| p.stats().uplinked == 1);
    client.write_all(b"takeoff").unwrap();
    h.pump_until("second uplink", |p| p.stats().uplinked == 2);

    for air in &h.air {
        let mut buf = [0u8; DATA_UNI_LENGTH];
        let first = air.receive(&mut buf).expect("uplink frame should arrive");
        assert_eq!(first.payload, b"arm");
        assert_eq!(first.seq, 1);

        let second = air.receive(&mut buf).expect("uplink frame should arrive");
        assert_eq!(second.payload, b"takeoff");
        assert_eq!(second.seq, 2);
    }
}

#[test]
fn every_client_receives_each_payload() {
    let mut h = harness(1, &config(4));
    let mut clients: Vec<TcpStream> = (0..3).map(|_| h.connect()).collect();

    h.downlink(0, b"telemetry", 9);
    h.drain();

    for client in &mut clients {
        assert_eq!(read_available(client), b"telemetry");
    }
}

#[test]
fn capacity_is_enforced_and_slots_are_reused() {
    let mut h = harness(1, &config(2));
    let first = h.connect();
    let _second = h.connect();

    let mut third = TcpStream::connect(h.proxy.local_addr().unwrap()).unwrap();
    third
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    h.drain();
    assert_eq!(h.proxy.fanout().client_count(), 2);
    let mut buf = [0u8; 1];
    assert_eq!(third.read(&mut buf).expect("rejected client should see EOF"), 0);

    drop(first);
    h.pump_until("slot release", |p| p.fanout().client_count() == 1);
    assert_eq!(h.proxy.fanout().slot_peer(0), None);

    let replacement = h.connect();
    assert_eq!(
        h.proxy.fanout().slot_peer(0),
        Some(replacement.local_addr().unwrap())
    );
}

#[test]
fn failing_adapter_does_not_stop_the_others() {
    let mut h = harness(2, &config(4));
    let mut client = h.connect();

    let dead = h.air.remove(0);
    drop(dead);
    h.downlink(0, b"still here", 4);
    for _ in 0..5 {
        h.proxy.poll_once().unwrap();
    }

    assert_eq!(read_available(&mut client), b"still here");
    assert!(h.proxy.stats().link_errors > 0);
    assert_eq!(h.proxy.state(), ProxyState::Running);
}

#[test]
fn frames_reach_log_and_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let overlay_path = dir.path().join("osd");
    let overlay = OverlaySink::open(&OverlayConfig {
        path: overlay_path.clone(),
        max_attempts: 1,
        backoff: Duration::from_millis(1),
    })
    .expect("overlay FIFO should open");
    let log = TelemetryLog::create(dir.path()).unwrap();

    let mut h = harness(2, &config(4));
    h.proxy = h.proxy.with_telemetry_log(log).with_overlay(overlay);
    h.downlink(0, b"gps", 1);
    h.downlink(1, b"gps", 1);
    h.downlink(1, b"batt", 2);
    h.drain();

    let mut osd = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(&overlay_path)
        .unwrap();
    let mut osd_bytes = [0u8; 7];
    osd.read_exact(&mut osd_bytes).unwrap();
    assert_eq!(&osd_bytes, b"gpsbatt");

    let report = h.proxy.shutdown();
    let (path, size) = match report.log {
        Some(LogDisposition::Kept { path, size }) => (path, size),
        other => panic!("log with records should be kept, got {other:?}"),
    };
    assert_eq!(size, (8 + 3) + (8 + 4));
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[8..11], b"gps");
    assert_eq!(&bytes[19..], b"batt");
}

#[test]
fn empty_log_is_removed_at_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(1, &config(4));
    h.proxy = h
        .proxy
        .with_telemetry_log(TelemetryLog::create(dir.path()).unwrap());
    let path = h.proxy.telemetry_path().unwrap().to_path_buf();
    h.drain();

    let report = h.proxy.shutdown();
    assert_eq!(report.log, Some(LogDisposition::Removed { path: path.clone() }));
    assert!(!Path::new(&path).exists());
}

#[test]
fn cancellation_stops_the_loop_within_one_timeout() {
    let mut cfg = config(4);
    cfg.poll_timeout = Duration::from_millis(50);
    let Harness { mut proxy, air } = harness(2, &cfg);
    let _client = TcpStream::connect(proxy.local_addr().unwrap()).unwrap();

    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let worker = thread::spawn(move || {
        let report = proxy.run(&remote);
        (proxy, report)
    });

    thread::sleep(Duration::from_millis(150));
    let requested = Instant::now();
    cancel.cancel();
    let (mut proxy, report) = worker.join().expect("proxy thread should not panic");
    assert!(requested.elapsed() < Duration::from_secs(2));

    let report = report.expect("run should shut down cleanly");
    assert_eq!(report.links_closed, 2);
    assert_eq!(report.clients_closed, 1);
    assert_eq!(proxy.state(), ProxyState::Stopped);
    assert!(proxy.local_addr().is_err());
    assert!(proxy.poll_once().is_err());
    drop(air);
}

