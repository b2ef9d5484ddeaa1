//! Ground-side diversity proxy.
//!
//! Frames arriving on several radio adapters are deduplicated by sequence
//! number and the surviving payloads are fanned out to TCP clients, an
//! append-only telemetry log and the on-screen-display FIFO. Data sent by
//! TCP clients goes the other way: each message is framed once with a fresh
//! sequence number and transmitted on every adapter.
//!
//! ```no_run
//! use groundlink_proxy::{CancelToken, Proxy, ProxyConfig};
//!
//! let config = ProxyConfig {
//!     adapters: vec!["wlan0".into(), "wlan1".into()],
//!     ..ProxyConfig::default()
//! };
//! let mut proxy = Proxy::from_config(&config)?;
//! let report = proxy.run(&CancelToken::new())?;
//! println!("delivered {} frames", report.stats.accepted);
//! # Ok::<(), groundlink_proxy::ProxyError>(())
//! ```

pub mod cancel;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fanout;
pub mod overlay;
pub mod poller;
pub mod proxy;
pub mod telemetry_log;

pub use cancel::CancelToken;
pub use config::{
    OverlayConfig, ProxyConfig, DEFAULT_LOG_DIR, DEFAULT_MAX_CLIENTS, DEFAULT_OVERLAY_PATH,
    DEFAULT_POLL_TIMEOUT, DEFAULT_TCP_PORT,
};
pub use dedup::DiversityFilter;
pub use error::{ProxyError, Result};
pub use fanout::{Admission, ClientRead, FanoutServer};
pub use overlay::OverlaySink;
pub use proxy::{Proxy, ProxyState, ProxyStats, ShutdownReport};
pub use telemetry_log::{LogDisposition, TelemetryLog};
