//! Tunnel frame structure and serialization

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

/// Frame header length in bytes
pub const FRAME_HDR_LEN: usize = 17;

/// Frame kind byte
///
/// Wraps the raw wire value so that unknown kinds decode successfully;
/// the dispatch layer drops frames it does not recognize instead of
/// tearing down the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Kind(u8);

impl Kind {
    /// DNS query carried client -> upstream
    pub const DNS_QUERY: Kind = Kind(0x01);
    /// DNS response carried upstream -> client
    pub const DNS_RESPONSE: Kind = Kind(0x02);
    /// Application-level liveness probe
    pub const HEARTBEAT: Kind = Kind(0x03);
    /// Acknowledgement of a liveness probe
    pub const HEARTBEAT_ACK: Kind = Kind(0x04);

    /// Wrap a raw kind byte
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Get the raw wire value
    pub const fn as_u8(&self) -> u8 {
        self.0
    }

    /// Whether this is one of the four defined kinds
    pub const fn is_known(&self) -> bool {
        matches!(self.0, 0x01..=0x04)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Kind::DNS_QUERY => write!(f, "DNS_QUERY"),
            Kind::DNS_RESPONSE => write!(f, "DNS_RESPONSE"),
            Kind::HEARTBEAT => write!(f, "HEARTBEAT"),
            Kind::HEARTBEAT_ACK => write!(f, "HEARTBEAT_ACK"),
            Kind(raw) => write!(f, "UNKNOWN(0x{:02x})", raw),
        }
    }
}

/// One tunnel message
///
/// ```text
/// +--------+-----------------------------------+
/// | Offset | Field                             |
/// +--------+-----------------------------------+
/// |      0 | kind (1 byte)                     |
/// |      1 | request id (u32, big-endian)      |
/// |      5 | timestamp (i64 ns, big-endian)    |
/// |     13 | payload length (u32, big-endian)  |
/// |     17 | payload                           |
/// +--------+-----------------------------------+
/// ```
///
/// The timestamp is stamped by the sender and is informational only;
/// correlation happens exclusively through the request id. Request id 0
/// is reserved for heartbeat traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message kind
    pub kind: Kind,
    /// Correlation id; 0 for heartbeats
    pub request_id: u32,
    /// Sender wall clock, nanoseconds since the Unix epoch
    pub timestamp: i64,
    /// Opaque payload; a packed DNS message for query/response kinds
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a DNS query frame
    pub fn dns_query(request_id: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: Kind::DNS_QUERY,
            request_id,
            timestamp: unix_nanos(),
            payload,
        }
    }

    /// Create a DNS response frame answering `request_id`
    pub fn dns_response(request_id: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: Kind::DNS_RESPONSE,
            request_id,
            timestamp: unix_nanos(),
            payload,
        }
    }

    /// Create a heartbeat frame
    pub fn heartbeat() -> Self {
        Self {
            kind: Kind::HEARTBEAT,
            request_id: 0,
            timestamp: unix_nanos(),
            payload: Vec::new(),
        }
    }

    /// Create a heartbeat acknowledgement frame
    pub fn heartbeat_ack() -> Self {
        Self {
            kind: Kind::HEARTBEAT_ACK,
            request_id: 0,
            timestamp: unix_nanos(),
            payload: Vec::new(),
        }
    }

    /// Encode the frame to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HDR_LEN + self.payload.len());
        buf.push(self.kind.as_u8());
        buf.extend_from_slice(&self.request_id.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a frame from bytes
    ///
    /// The buffer must contain exactly one frame: short buffers and
    /// trailing bytes beyond the declared payload length are both errors.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HDR_LEN {
            return Err(Error::FrameTooShort {
                expected: FRAME_HDR_LEN,
                actual: buf.len(),
            });
        }

        let payload_len =
            u32::from_be_bytes([buf[13], buf[14], buf[15], buf[16]]) as usize;
        let total = FRAME_HDR_LEN + payload_len;

        if buf.len() < total {
            return Err(Error::FrameTooShort {
                expected: total,
                actual: buf.len(),
            });
        }
        if buf.len() > total {
            return Err(Error::TrailingData {
                declared: total,
                actual: buf.len(),
            });
        }

        Ok(Self {
            kind: Kind::new(buf[0]),
            request_id: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            timestamp: i64::from_be_bytes([
                buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11], buf[12],
            ]),
            payload: buf[FRAME_HDR_LEN..].to_vec(),
        })
    }
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encode_decode() {
        let frame = Frame::dns_query(42, vec![1, 2, 3, 4, 5]);

        let encoded = frame.encode();
        assert_eq!(encoded.len(), FRAME_HDR_LEN + 5);
        assert_eq!(encoded[0], 0x01);

        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let frame = Frame::heartbeat();
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(frame, decoded);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_heartbeat_constructors_clear_request_id() {
        assert_eq!(Frame::heartbeat().request_id, 0);
        assert_eq!(Frame::heartbeat_ack().request_id, 0);
        assert_eq!(Frame::heartbeat().kind, Kind::HEARTBEAT);
        assert_eq!(Frame::heartbeat_ack().kind, Kind::HEARTBEAT_ACK);
    }

    #[test]
    fn test_constructors_stamp_timestamp() {
        let frame = Frame::dns_response(7, vec![0xAA]);
        assert!(frame.timestamp > 0);
    }

    #[test]
    fn test_decode_short_buffer() {
        let err = Frame::decode(&[0x01, 0x00, 0x00]).unwrap_err();
        assert!(matches!(
            err,
            Error::FrameTooShort {
                expected: FRAME_HDR_LEN,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let mut encoded = Frame::dns_query(1, vec![0xAB; 10]).encode();
        encoded.truncate(FRAME_HDR_LEN + 4);

        let err = Frame::decode(&encoded).unwrap_err();
        assert!(matches!(err, Error::FrameTooShort { .. }));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut encoded = Frame::dns_query(1, vec![0xAB; 10]).encode();
        encoded.push(0xFF);

        let err = Frame::decode(&encoded).unwrap_err();
        assert!(matches!(err, Error::TrailingData { .. }));
    }

    #[test]
    fn test_unknown_kind_decodes() {
        let mut encoded = Frame::dns_query(9, vec![1, 2]).encode();
        encoded[0] = 0x7F;

        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.kind, Kind::new(0x7F));
        assert!(!decoded.kind.is_known());
        assert_eq!(decoded.request_id, 9);
        assert_eq!(decoded.payload, vec![1, 2]);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(format!("{}", Kind::DNS_QUERY), "DNS_QUERY");
        assert_eq!(format!("{}", Kind::new(0xEE)), "UNKNOWN(0xee)");
    }

    #[test]
    fn test_large_payload_roundtrip() {
        let payload: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
        let frame = Frame::dns_response(u32::MAX, payload);
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(frame, decoded);
    }
}
