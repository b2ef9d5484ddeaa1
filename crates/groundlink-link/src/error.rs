use crate::config::LinkMode;

/// Errors that can occur opening link sockets or framing link traffic.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// No network interface with this name exists.
    #[error("adapter {adapter} not found")]
    AdapterNotFound { adapter: String },

    /// The raw socket could not be created or bound.
    #[error("failed to open raw socket on {adapter}: {source}")]
    Open {
        adapter: String,
        source: std::io::Error,
    },

    /// The requested link mode has no socket implementation.
    #[error("link mode {0:?} is not supported")]
    UnsupportedMode(LinkMode),

    /// An I/O error occurred on the underlying socket.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The received buffer ends before the header or payload it announces.
    #[error("truncated link frame ({len} bytes, need {need})")]
    Truncated { len: usize, need: usize },

    /// The payload does not fit in one link frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame is addressed to another session, port or direction.
    #[error("foreign frame (comm id {comm_id}, port {port:#04x}, direction {direction:#04x})")]
    ForeignFrame { comm_id: u8, port: u8, direction: u8 },

    /// The socket accepted fewer bytes than the frame holds.
    #[error("short send on {adapter}: {written} of {expected} bytes")]
    ShortSend {
        adapter: String,
        written: usize,
        expected: usize,
    },
}

impl LinkError {
    /// Whether the error concerns a single frame rather than the socket.
    pub fn is_frame_level(&self) -> bool {
        matches!(
            self,
            LinkError::Truncated { .. } | LinkError::ForeignFrame { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
