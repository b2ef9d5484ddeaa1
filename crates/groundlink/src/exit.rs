use std::fmt;
use std::io;

use groundlink_link::LinkError;
use groundlink_proxy::ProxyError;
use groundlink_shm::ShmError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable | io::ErrorKind::NotFound => {
            TRANSPORT_ERROR
        }
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn shm_error(context: &str, err: ShmError) -> CliError {
    let message = format!("{context}: {err}");
    let code = match &err {
        ShmError::InvalidName { .. } => USAGE,
        ShmError::Open { source, .. }
        | ShmError::Truncate { source, .. }
        | ShmError::Map { source, .. }
        | ShmError::RetriesExhausted { source, .. } => match source.kind() {
            io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
            io::ErrorKind::NotFound => FAILURE,
            _ => INTERNAL,
        },
        ShmError::SizeMismatch { .. } => FAILURE,
    };
    CliError::new(code, message)
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Open { ref source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        LinkError::UnsupportedMode(_) => CliError::new(USAGE, format!("{context}: {err}")),
        LinkError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn proxy_error(context: &str, err: ProxyError) -> CliError {
    match err {
        ProxyError::Bind { source, addr } => {
            io_error(&format!("{context}: cannot listen on {addr}"), source)
        }
        ProxyError::Link(err) => link_error(context, err),
        ProxyError::Poll(source) | ProxyError::Io(source) => io_error(context, source),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
