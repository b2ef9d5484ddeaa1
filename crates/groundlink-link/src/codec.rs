use std::ops::Range;

use bytes::{BufMut, BytesMut};

use crate::config::{LinkConfig, Port};
use crate::error::{LinkError, Result};

/// Size of one raw link buffer unit.
pub const DATA_UNI_LENGTH: usize = 2048;

/// Raw v2 link header: control (4) + direction (1) + comm id (1) + port (1)
/// + payload length (2) + sequence number (1).
pub const RAW_V2_HEADER_LEN: usize = 10;

/// Largest payload one link frame carries.
pub const MAX_PAYLOAD: usize = DATA_UNI_LENGTH - RAW_V2_HEADER_LEN;

/// Extra bytes between link header and payload when adhering to 802.11
/// header layout, so the payload sits past a full 24-byte MAC header.
pub const ADHERE_80211_OFFSET: usize = 14;

/// Length of the radiotap header prepended on transmit.
pub const RADIOTAP_TX_LEN: usize = 12;

/// Smallest legal radiotap header (version, pad, length, present word).
const RADIOTAP_MIN_LEN: usize = 8;

/// Radiotap "no ack" transmit flag.
const TX_FLAG_NOACK: u16 = 0x0008;

/// Location of the payload inside a received buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Bytes preceding the payload: radiotap + link header + any offset.
    pub header_len: usize,
    pub payload_len: usize,
    pub seq: u8,
}

impl DecodedFrame {
    /// Payload byte range within the decoded buffer.
    pub fn payload_range(&self) -> Range<usize> {
        self.header_len..self.header_len + self.payload_len
    }
}

/// Encode one outbound frame.
///
/// Wire format:
/// ```text
/// ┌───────────────┬──────────┬─────┬─────────┬──────┬──────────┬─────┬──────────┬─────────┐
/// │ Radiotap (12) │ Ctrl (4) │ Dir │ Comm id │ Port │ Len (LE) │ Seq │ [Offset] │ Payload │
/// └───────────────┴──────────┴─────┴─────────┴──────┴──────────┴─────┴──────────┴─────────┘
/// ```
pub fn encode_frame(
    config: &LinkConfig,
    port: Port,
    payload: &[u8],
    seq: u8,
    dst: &mut BytesMut,
) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(LinkError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let offset = payload_offset(config);
    dst.reserve(RADIOTAP_TX_LEN + RAW_V2_HEADER_LEN + offset + payload.len());

    // radiotap: version 0, length 12, present = RATE | TX_FLAGS
    dst.put_u8(0);
    dst.put_u8(0);
    dst.put_u16_le(RADIOTAP_TX_LEN as u16);
    dst.put_u32_le((1 << 2) | (1 << 15));
    dst.put_u8(radiotap_rate(config.bitrate_mbps));
    dst.put_u8(0);
    dst.put_u16_le(TX_FLAG_NOACK);

    dst.put_slice(&config.frame_type.control_bytes());
    dst.put_u8(config.direction as u8);
    dst.put_u8(config.comm_id);
    dst.put_u8(port as u8);
    dst.put_u16_le(payload.len() as u16);
    dst.put_u8(seq);
    dst.put_bytes(0, offset);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a received buffer.
///
/// Frames not addressed to this endpoint (other comm id, port, or a
/// direction other than towards us) are rejected as
/// [`LinkError::ForeignFrame`].
pub fn decode_frame(src: &[u8], config: &LinkConfig) -> Result<DecodedFrame> {
    if src.len() < RADIOTAP_MIN_LEN {
        return Err(LinkError::Truncated {
            len: src.len(),
            need: RADIOTAP_MIN_LEN,
        });
    }

    let radiotap_len = u16::from_le_bytes([src[2], src[3]]) as usize;
    let link_end = radiotap_len.max(RADIOTAP_MIN_LEN) + RAW_V2_HEADER_LEN;
    if src.len() < link_end {
        return Err(LinkError::Truncated {
            len: src.len(),
            need: link_end,
        });
    }

    let header = &src[link_end - RAW_V2_HEADER_LEN..link_end];
    let direction = header[4];
    let comm_id = header[5];
    let port = header[6];
    let payload_len = u16::from_le_bytes([header[7], header[8]]) as usize;
    let seq = header[9];

    if comm_id != config.comm_id
        || port != config.port as u8
        || direction != config.direction.reverse() as u8
    {
        return Err(LinkError::ForeignFrame {
            comm_id,
            port,
            direction,
        });
    }

    let header_len = link_end + payload_offset(config);
    let need = header_len + payload_len;
    if src.len() < need {
        return Err(LinkError::Truncated {
            len: src.len(),
            need,
        });
    }

    Ok(DecodedFrame {
        header_len,
        payload_len,
        seq,
    })
}

fn payload_offset(config: &LinkConfig) -> usize {
    if config.adhere_80211 {
        ADHERE_80211_OFFSET
    } else {
        0
    }
}

/// Radiotap rate field, in 500 kbps units.
fn radiotap_rate(mbps: u8) -> u8 {
    match mbps {
        5 => 11,
        other => other.saturating_mul(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Direction, FrameType};

    fn ground() -> LinkConfig {
        LinkConfig::default()
    }

    fn air() -> LinkConfig {
        LinkConfig {
            direction: Direction::ToGround,
            ..LinkConfig::default()
        }
    }

    #[test]
    fn air_frame_decodes_on_ground() {
        let mut wire = BytesMut::new();
        encode_frame(&air(), Port::Proxy, b"telemetry", 42, &mut wire).unwrap();

        let frame = decode_frame(&wire, &ground()).unwrap();
        assert_eq!(frame.seq, 42);
        assert_eq!(frame.header_len, RADIOTAP_TX_LEN + RAW_V2_HEADER_LEN);
        assert_eq!(&wire[frame.payload_range()], b"telemetry");
    }

    #[test]
    fn header_fields_land_at_fixed_offsets() {
        let mut wire = BytesMut::new();
        let config = LinkConfig {
            comm_id: 7,
            frame_type: FrameType::Rts,
            bitrate_mbps: 5,
            ..ground()
        };
        encode_frame(&config, Port::Controller, b"x", 9, &mut wire).unwrap();

        assert_eq!(u16::from_le_bytes([wire[2], wire[3]]) as usize, RADIOTAP_TX_LEN);
        assert_eq!(wire[8], 11);
        let h = &wire[RADIOTAP_TX_LEN..];
        assert_eq!(&h[..4], &FrameType::Rts.control_bytes());
        assert_eq!(h[4], Direction::ToUav as u8);
        assert_eq!(h[5], 7);
        assert_eq!(h[6], Port::Controller as u8);
        assert_eq!(u16::from_le_bytes([h[7], h[8]]), 1);
        assert_eq!(h[9], 9);
    }

    #[test]
    fn compliance_offset_shifts_payload() {
        let sender = LinkConfig {
            adhere_80211: true,
            ..air()
        };
        let receiver = LinkConfig {
            adhere_80211: true,
            ..ground()
        };
        let mut wire = BytesMut::new();
        encode_frame(&sender, Port::Proxy, b"abc", 1, &mut wire).unwrap();

        let frame = decode_frame(&wire, &receiver).unwrap();
        assert_eq!(
            frame.header_len,
            RADIOTAP_TX_LEN + RAW_V2_HEADER_LEN + ADHERE_80211_OFFSET
        );
        assert_eq!(&wire[frame.payload_range()], b"abc");
    }

    #[test]
    fn longer_radiotap_header_is_skipped() {
        let mut wire = BytesMut::new();
        encode_frame(&air(), Port::Proxy, b"rx", 3, &mut wire).unwrap();

        // Receivers report larger radiotap headers than transmitters send.
        let mut rx = vec![0u8, 0, 36, 0];
        rx.resize(36, 0xee);
        rx.extend_from_slice(&wire[RADIOTAP_TX_LEN..]);

        let frame = decode_frame(&rx, &ground()).unwrap();
        assert_eq!(frame.header_len, 36 + RAW_V2_HEADER_LEN);
        assert_eq!(&rx[frame.payload_range()], b"rx");
    }

    #[test]
    fn trailing_bytes_after_payload_are_ignored() {
        let mut wire = BytesMut::new();
        encode_frame(&air(), Port::Proxy, b"data", 5, &mut wire).unwrap();
        wire.put_slice(&[0xde, 0xad, 0xbe, 0xef]); // FCS

        let frame = decode_frame(&wire, &ground()).unwrap();
        assert_eq!(frame.payload_len, 4);
    }

    #[test]
    fn own_direction_is_foreign() {
        let mut wire = BytesMut::new();
        encode_frame(&ground(), Port::Proxy, b"echo", 1, &mut wire).unwrap();

        let result = decode_frame(&wire, &ground());
        assert!(matches!(result, Err(LinkError::ForeignFrame { .. })));
    }

    #[test]
    fn other_comm_id_is_foreign() {
        let sender = LinkConfig {
            comm_id: 1,
            ..air()
        };
        let mut wire = BytesMut::new();
        encode_frame(&sender, Port::Proxy, b"x", 1, &mut wire).unwrap();

        let result = decode_frame(&wire, &ground());
        assert!(matches!(
            result,
            Err(LinkError::ForeignFrame { comm_id: 1, .. })
        ));
    }

    #[test]
    fn other_port_is_foreign() {
        let mut wire = BytesMut::new();
        encode_frame(&air(), Port::Video, b"x", 1, &mut wire).unwrap();
        assert!(matches!(
            decode_frame(&wire, &ground()),
            Err(LinkError::ForeignFrame { .. })
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut wire = BytesMut::new();
        encode_frame(&air(), Port::Proxy, b"0123456789", 1, &mut wire).unwrap();
        wire.truncate(wire.len() - 3);

        assert!(matches!(
            decode_frame(&wire, &ground()),
            Err(LinkError::Truncated { .. })
        ));
    }

    #[test]
    fn short_buffer_is_truncated() {
        assert!(matches!(
            decode_frame(&[0, 0, 12], &ground()),
            Err(LinkError::Truncated { need: 8, .. })
        ));
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let mut wire = BytesMut::new();
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let result = encode_frame(&ground(), Port::Controller, &payload, 0, &mut wire);
        assert!(matches!(result, Err(LinkError::PayloadTooLarge { .. })));
        assert!(wire.is_empty());
    }

    #[test]
    fn max_payload_fits() {
        let mut wire = BytesMut::new();
        let payload = vec![0x5a; MAX_PAYLOAD];
        encode_frame(&air(), Port::Proxy, &payload, 0, &mut wire).unwrap();
        let frame = decode_frame(&wire, &ground()).unwrap();
        assert_eq!(frame.payload_len, MAX_PAYLOAD);
    }
}
