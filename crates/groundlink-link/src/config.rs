//! Per-socket link identity and tuning.
//!
//! These values are passed through to the wire header and radiotap layer;
//! they are not validated beyond their type's range.

/// Default session id shared by ground station and aircraft.
pub const DEFAULT_COMM_ID: u8 = 200;

/// Default injection bitrate in Mbps.
pub const DEFAULT_BITRATE_MBPS: u8 = 1;

/// Adapter operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Monitor mode with raw frame injection.
    Monitor,
    /// Managed Wi-Fi. Not implemented.
    Wifi,
}

impl LinkMode {
    /// Parse the single-character mode selector (`m` or `w`).
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'm' | 'M' => Some(Self::Monitor),
            'w' | 'W' => Some(Self::Wifi),
            _ => None,
        }
    }
}

/// Travel direction carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    ToUav = 0x01,
    ToGround = 0x03,
}

impl Direction {
    /// The direction frames arriving at this endpoint carry.
    pub fn reverse(self) -> Self {
        match self {
            Self::ToUav => Self::ToGround,
            Self::ToGround => Self::ToUav,
        }
    }
}

/// Logical port a frame is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Port {
    Controller = 0x01,
    Telemetry = 0x02,
    Video = 0x03,
    Comm = 0x04,
    Status = 0x05,
    Proxy = 0x06,
    Rc = 0x07,
}

/// 802.11 frame type used to carry the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Request-to-send frames.
    Rts,
    /// Data frames (CTS protected).
    Data,
}

impl FrameType {
    /// Parse the numeric selector (`1` = RTS, `2` = DATA).
    pub fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            1 => Some(Self::Rts),
            2 => Some(Self::Data),
            _ => None,
        }
    }

    /// Frame control and duration bytes opening the link header.
    pub fn control_bytes(self) -> [u8; 4] {
        match self {
            Self::Rts => [0xb4, 0x01, 0x00, 0x00],
            Self::Data => [0x08, 0x02, 0x00, 0x00],
        }
    }
}

/// Configuration bound to one link socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Session id; frames with another id are ignored.
    pub comm_id: u8,
    pub mode: LinkMode,
    /// Injection bitrate hint in Mbps.
    pub bitrate_mbps: u8,
    /// Direction stamped on outbound frames.
    pub direction: Direction,
    /// Port this socket receives on.
    pub port: Port,
    pub frame_type: FrameType,
    /// Shift the payload past a full 802.11 header for stock kernels.
    pub adhere_80211: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            comm_id: DEFAULT_COMM_ID,
            mode: LinkMode::Monitor,
            bitrate_mbps: DEFAULT_BITRATE_MBPS,
            direction: Direction::ToUav,
            port: Port::Proxy,
            frame_type: FrameType::Data,
            adhere_80211: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_selector_parses_known_characters() {
        assert_eq!(LinkMode::from_char('m'), Some(LinkMode::Monitor));
        assert_eq!(LinkMode::from_char('w'), Some(LinkMode::Wifi));
        assert_eq!(LinkMode::from_char('x'), None);
    }

    #[test]
    fn frame_type_selector() {
        assert_eq!(FrameType::from_selector(1), Some(FrameType::Rts));
        assert_eq!(FrameType::from_selector(2), Some(FrameType::Data));
        assert_eq!(FrameType::from_selector(3), None);
    }

    #[test]
    fn reverse_direction_is_an_involution() {
        assert_eq!(Direction::ToUav.reverse(), Direction::ToGround);
        assert_eq!(Direction::ToUav.reverse().reverse(), Direction::ToUav);
    }
}
