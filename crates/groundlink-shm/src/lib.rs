//! Named shared-memory state channels.
//!
//! Independently scheduled processes (RC input, the ground proxy, UI) hand
//! live state to each other through fixed-size records in POSIX shared
//! memory, without a broker:
//!
//! - [`GroundStatus`]: ground adapter and link health
//! - [`RcStatus`]: RC link health
//! - [`UavStatus`]: aircraft summary, cleared on every open
//! - [`RcChannels`]: stick/aux positions, centered at [`RC_CENTER`] by the first writer
//! - [`RcOverrides`]: per-channel overrides, zero means inactive
//!
//! See [`channel`] for the lock-free, torn-read-tolerant access contract.

pub mod channel;
pub mod error;
pub mod records;

pub use channel::{unlink, OpenMode, RetryPolicy, SharedRecord, StateChannel};
pub use error::{Result, ShmError};
pub use records::{
    AdapterStatus, ChannelArray, GroundStatus, RcChannels, RcOverrides, RcStatus, UavStatus,
    IFNAMSIZ, MAX_ADAPTERS, RC_CENTER, RC_CHANNEL_COUNT, RC_OVERRIDE_INACTIVE,
};
