use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use groundlink_link::{
    FrameType, LinkConfig, LinkMode, DEFAULT_BITRATE_MBPS, DEFAULT_COMM_ID, MAX_ADAPTERS,
};
use groundlink_proxy::{OverlayConfig, ProxyConfig, DEFAULT_LOG_DIR, DEFAULT_MAX_CLIENTS};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod proxy;
pub mod shm;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect or initialise shared-memory state channels.
    Shm(ShmArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Shm(args) => shm::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Flags for the proxy, which runs when no subcommand is given.
#[derive(Args, Debug, Clone)]
pub struct ProxyArgs {
    /// Adapter to receive on and transmit through (repeatable, up to 4).
    #[arg(short = 'n', value_name = "ADAPTER")]
    pub adapters: Vec<String>,
    /// Link mode: m (monitor) or w (wifi, not supported).
    #[arg(short = 'm', value_name = "m|w", default_value = "m", value_parser = parse_mode)]
    pub mode: LinkMode,
    /// Session id, 0-255. Must match the aircraft.
    #[arg(short = 'c', value_name = "ID", default_value_t = DEFAULT_COMM_ID)]
    pub comm_id: u8,
    /// Transmit bit rate in Mbps (Ralink chipsets only).
    #[arg(short = 'b', value_name = "MBPS", default_value_t = DEFAULT_BITRATE_MBPS)]
    pub bitrate: u8,
    /// Write telemetry to the on-screen-display FIFO.
    #[arg(short = 'o', value_name = "Y|N", action = clap::ArgAction::Set, default_value = "Y", value_parser = parse_yes_no)]
    pub overlay: bool,
    /// Raw frame type: 1 = RTS, 2 = DATA.
    #[arg(short = 'f', value_name = "1|2", default_value = "2", value_parser = parse_frame_type)]
    pub frame_type: FrameType,
    /// Directory for telemetry log files.
    #[arg(short = 'l', value_name = "DIR", env = "GROUNDLINK_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,
    /// Offset payloads past a full 802.11 header (needed on stock kernels).
    #[arg(short = 'a', value_name = "0|1", action = clap::ArgAction::Set, default_value = "0", value_parser = parse_zero_one)]
    pub adhere_80211: bool,
    /// TCP address for ground control applications.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:1604")]
    pub listen: SocketAddr,
    /// Maximum concurrent TCP clients.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_CLIENTS)]
    pub max_clients: usize,
    /// Overlay FIFO path.
    #[arg(long, value_name = "PATH")]
    pub overlay_path: Option<PathBuf>,
}

impl ProxyArgs {
    pub fn to_config(&self) -> ProxyConfig {
        let link = LinkConfig {
            comm_id: self.comm_id,
            mode: self.mode,
            bitrate_mbps: self.bitrate,
            frame_type: self.frame_type,
            adhere_80211: self.adhere_80211,
            ..LinkConfig::default()
        };
        let overlay = self.overlay.then(|| {
            let mut overlay = OverlayConfig::default();
            if let Some(path) = &self.overlay_path {
                overlay.path = path.clone();
            }
            overlay
        });
        ProxyConfig {
            adapters: self.adapters.iter().take(MAX_ADAPTERS).cloned().collect(),
            link,
            listen_addr: self.listen,
            max_clients: self.max_clients,
            log_dir: Some(self.log_dir.clone()),
            overlay,
            ..ProxyConfig::default()
        }
    }
}

fn parse_mode(value: &str) -> Result<LinkMode, String> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => LinkMode::from_char(c).ok_or_else(|| format!("unknown mode '{c}'")),
        _ => Err("expected a single character".to_string()),
    }
}

fn parse_yes_no(value: &str) -> Result<bool, String> {
    match value {
        "Y" | "y" => Ok(true),
        "N" | "n" => Ok(false),
        other => Err(format!("expected Y or N, got '{other}'")),
    }
}

fn parse_zero_one(value: &str) -> Result<bool, String> {
    match value {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(format!("expected 0 or 1, got '{other}'")),
    }
}

fn parse_frame_type(value: &str) -> Result<FrameType, String> {
    value
        .parse::<u8>()
        .ok()
        .and_then(FrameType::from_selector)
        .ok_or_else(|| format!("expected 1 or 2, got '{value}'"))
}

#[derive(Args, Debug)]
pub struct ShmArgs {
    #[command(subcommand)]
    pub command: ShmCommand,
}

#[derive(Subcommand, Debug)]
pub enum ShmCommand {
    /// Print the current contents of an existing channel.
    Show(ChannelArgs),
    /// Create the channel if needed and reset it to its initial values.
    Init(ChannelArgs),
}

#[derive(Args, Debug)]
pub struct ChannelArgs {
    /// Which channel.
    pub kind: ChannelKind,

    /// Shared-memory object to use instead of the channel's standard name.
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ChannelKind {
    GroundStatus,
    RcStatus,
    UavStatus,
    RcValues,
    RcOverrides,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
