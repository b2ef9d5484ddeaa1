//! Ground-side diversity radio link proxy.
//!
//! # Crate Structure
//!
//! - [`shm`]: named shared-memory state channels and their fixed-layout records
//! - [`link`]: raw link framing and per-adapter sockets
//! - [`proxy`]: the deduplicating multiplexer, TCP fan-out and telemetry sinks
//!
//! The `groundlink` binary (behind the `cli` feature) runs the proxy and
//! inspects state channels.

/// Re-export state channel types.
pub mod shm {
    pub use groundlink_shm::*;
}

/// Re-export link types.
pub mod link {
    pub use groundlink_link::*;
}

/// Re-export proxy types.
pub mod proxy {
    pub use groundlink_proxy::*;
}
