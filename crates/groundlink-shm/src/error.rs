/// Errors that can occur while creating, opening or mapping a state channel.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// The channel name is not a valid POSIX shared-memory object name.
    #[error("invalid channel name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// `shm_open` failed.
    #[error("failed to open channel {name}: {source}")]
    Open {
        name: String,
        source: std::io::Error,
    },

    /// The region could not be sized to the record layout.
    #[error("failed to size channel {name} to {size} bytes: {source}")]
    Truncate {
        name: String,
        size: usize,
        source: std::io::Error,
    },

    /// The region could not be mapped into this process.
    #[error("failed to map channel {name}: {source}")]
    Map {
        name: String,
        source: std::io::Error,
    },

    /// An existing region is smaller than the record it is opened as.
    #[error("channel {name} holds {actual} bytes, record needs {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: u64,
    },

    /// A bounded retry policy gave up waiting for the channel.
    #[error("gave up opening channel {name} after {attempts} attempts: {source}")]
    RetriesExhausted {
        name: String,
        attempts: u32,
        source: std::io::Error,
    },
}

impl ShmError {
    /// Whether this error is a startup-race condition worth retrying.
    ///
    /// Only `shm_open` failures are transient; sizing and mapping failures mean
    /// the region can never become usable.
    pub fn is_transient(&self) -> bool {
        matches!(self, ShmError::Open { .. })
    }
}

pub type Result<T> = std::result::Result<T, ShmError>;
