use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use groundlink_link::{LinkConfig, Port};

/// Well-known TCP port for ground control applications.
pub const DEFAULT_TCP_PORT: u16 = 1604;

/// Concurrent TCP clients tracked by the fan-out server.
pub const DEFAULT_MAX_CLIENTS: usize = 10;

/// Upper bound on one readiness wait; also the cancellation check interval.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Directory for telemetry logs.
pub const DEFAULT_LOG_DIR: &str = "/var/log/groundlink";

/// Named pipe read by the on-screen display.
pub const DEFAULT_OVERLAY_PATH: &str = "/root/telemetryfifo1";

/// Overlay sink open behavior.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub path: PathBuf,
    /// Open attempts (each creating the FIFO first) after the initial one.
    pub max_attempts: u32,
    /// Sleep after each failed attempt.
    pub backoff: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_OVERLAY_PATH),
            max_attempts: 10,
            backoff: Duration::from_secs(3),
        }
    }
}

/// Everything the proxy needs to start.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Diversity adapters, one link socket each.
    pub adapters: Vec<String>,
    /// Configuration shared by every link socket.
    pub link: LinkConfig,
    pub listen_addr: SocketAddr,
    pub max_clients: usize,
    pub poll_timeout: Duration,
    /// Port stamped on frames carrying client payloads to the aircraft.
    pub uplink_port: Port,
    /// Telemetry log directory. `None` disables the log.
    pub log_dir: Option<PathBuf>,
    /// Overlay sink. `None` disables it.
    pub overlay: Option<OverlayConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            adapters: Vec::new(),
            link: LinkConfig::default(),
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_TCP_PORT)),
            max_clients: DEFAULT_MAX_CLIENTS,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            uplink_port: Port::Controller,
            log_dir: Some(PathBuf::from(DEFAULT_LOG_DIR)),
            overlay: Some(OverlayConfig::default()),
        }
    }
}
