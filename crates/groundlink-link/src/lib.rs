//! Raw diversity-link framing and per-adapter sockets.
//!
//! Each configured radio adapter gets one [`LinkSocket`]. A socket strips the
//! radiotap and link headers on receive and returns the payload together with
//! the 8-bit sequence number the sender stamped on it; on send it wraps a
//! payload with a caller-assigned sequence number.
//!
//! Combining several adapters (deduplication, broadcast) is left to the
//! caller.

pub mod codec;
pub mod config;
pub mod error;
pub mod seq;
pub mod socket;

pub use codec::{
    decode_frame, encode_frame, DecodedFrame, ADHERE_80211_OFFSET, DATA_UNI_LENGTH, MAX_PAYLOAD,
    RAW_V2_HEADER_LEN,
};
pub use config::{
    Direction, FrameType, LinkConfig, LinkMode, Port, DEFAULT_BITRATE_MBPS, DEFAULT_COMM_ID,
};
pub use error::{LinkError, Result};
pub use seq::{SeqCounter, FIRST_SEQ};
#[cfg(target_os = "linux")]
pub use socket::PacketSocket;
pub use socket::{LinkSocket, RawChannel, Received};

/// Maximum number of diversity adapters one process drives.
pub const MAX_ADAPTERS: usize = 4;
