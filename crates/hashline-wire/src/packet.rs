//! Telehash packet framing
//!
//! Wire format:
//! [Header length: 2 bytes, big-endian][Header: JSON object][Body: opaque]
//!
//! Every header field is optional and omitted from the JSON when absent, so
//! a receiver can recognise a pure ack by the fields that are present.

use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{WireError, WireResult};
use crate::hashname::Hashname;
use crate::MIN_FRAME_SIZE;

/// Packet header
///
/// `line`/`iv`/`open`/`sig`/`at`/`to`/`family` belong to the line handshake
/// and `seek`/`see`/`peer`/`ip`/`port` to the DHT control channel; both are
/// parsed here but consumed by their own layers. `_` is an opaque
/// application sub-document carried verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    /// Channel type, set on the first packet of a channel
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub typ: String,

    /// Line id
    #[serde(skip_serializing_if = "String::is_empty")]
    pub line: String,

    /// Initialisation vector for the line cipher
    #[serde(skip_serializing_if = "String::is_empty")]
    pub iv: String,

    /// Encrypted open payload
    #[serde(skip_serializing_if = "String::is_empty")]
    pub open: String,

    /// Open signature
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sig: String,

    /// Channel id (hex)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub c: String,

    /// Destination hashname of an open
    #[serde(skip_serializing_if = "String::is_empty")]
    pub to: String,

    /// Open timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<i64>,

    /// Line family
    #[serde(skip_serializing_if = "String::is_empty")]
    pub family: String,

    /// Sequence number, >= 1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    /// Highest contiguous seq received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,

    /// Seqs above `ack` not yet received
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub miss: Vec<u64>,

    /// Terminal packet of this channel
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub end: bool,

    /// Protocol-level error message
    #[serde(skip_serializing_if = "String::is_empty")]
    pub err: String,

    /// DHT probe target
    #[serde(skip_serializing_if = "String::is_empty")]
    pub seek: String,

    /// DHT probe response
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub see: Vec<String>,

    /// Peer introduction target
    #[serde(skip_serializing_if = "String::is_empty")]
    pub peer: String,

    /// Introduced address
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip: String,

    /// Introduced port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Opaque application header, never parsed by the core
    #[serde(rename = "_", skip_serializing_if = "Option::is_none")]
    pub custom: Option<Box<RawValue>>,
}

impl Header {
    /// True when this header carries nothing but ack bookkeeping
    ///
    /// `ack` must be present; `c` and `miss` may accompany it; everything
    /// else must be absent.
    pub fn just_ack(&self) -> bool {
        self.typ.is_empty()
            && self.line.is_empty()
            && self.iv.is_empty()
            && self.open.is_empty()
            && self.sig.is_empty()
            && self.to.is_empty()
            && self.at.is_none()
            && self.family.is_empty()
            && self.seq.is_none()
            && self.ack.is_some()
            && !self.end
            && self.err.is_empty()
            && self.seek.is_empty()
            && self.see.is_empty()
            && self.peer.is_empty()
            && self.ip.is_empty()
            && self.port.is_none()
            && self.custom.is_none()
    }
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ
            && self.line == other.line
            && self.iv == other.iv
            && self.open == other.open
            && self.sig == other.sig
            && self.c == other.c
            && self.to == other.to
            && self.at == other.at
            && self.family == other.family
            && self.seq == other.seq
            && self.ack == other.ack
            && self.miss == other.miss
            && self.end == other.end
            && self.err == other.err
            && self.seek == other.seek
            && self.see == other.see
            && self.peer == other.peer
            && self.ip == other.ip
            && self.port == other.port
            && self.custom.as_deref().map(RawValue::get)
                == other.custom.as_deref().map(RawValue::get)
    }
}

impl Eq for Header {}

/// A parsed packet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
    /// Packet header
    pub hdr: Header,

    /// Opaque body; empty and absent are equivalent
    pub body: Bytes,

    /// Origin address, when the packet came off the network
    pub addr: Option<SocketAddr>,

    /// Hashname of the peer, once the line layer has attributed the packet
    pub peer: Hashname,
}

impl Packet {
    /// Create a packet from a header and body
    pub fn new(hdr: Header, body: impl Into<Bytes>) -> Self {
        Self {
            hdr,
            body: body.into(),
            addr: None,
            peer: Hashname::ZERO,
        }
    }

    /// True when this packet is absorbed by the ack engine alone
    pub fn just_ack(&self) -> bool {
        self.body.is_empty() && self.hdr.just_ack()
    }

    /// Decode the opaque application header, when one is present
    pub fn custom_as<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<Option<T>> {
        match &self.hdr.custom {
            Some(raw) => serde_json::from_str(raw.get()).map(Some),
            None => Ok(None),
        }
    }

    /// Serialise to the wire format
    pub fn encode(&self) -> WireResult<Bytes> {
        let hdr = serde_json::to_vec(&self.hdr).map_err(WireError::MalformedHeader)?;
        if hdr.len() > u16::MAX as usize {
            return Err(WireError::HeaderTooLarge(hdr.len()));
        }

        let mut buf = BytesMut::with_capacity(2 + hdr.len() + self.body.len());
        buf.put_u16(hdr.len() as u16);
        buf.put_slice(&hdr);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }

    /// Parse a frame received from the line layer
    pub fn decode(input: &[u8], addr: Option<SocketAddr>) -> WireResult<Self> {
        if input.len() < MIN_FRAME_SIZE {
            return Err(WireError::MalformedFrame("frame shorter than 4 bytes"));
        }

        let hdr_len = u16::from_be_bytes([input[0], input[1]]) as usize;
        if input.len() < 2 + hdr_len {
            return Err(WireError::MalformedFrame("header length overruns frame"));
        }

        let hdr: Header =
            serde_json::from_slice(&input[2..2 + hdr_len]).map_err(WireError::MalformedHeader)?;

        Ok(Self {
            hdr,
            body: Bytes::copy_from_slice(&input[2 + hdr_len..]),
            addr,
            peer: Hashname::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut hdr = Header::default();
        hdr.typ = "seek".to_string();
        hdr.c = "00ff".to_string();
        hdr.seq = Some(3);
        hdr.ack = Some(2);
        hdr.miss = vec![1];
        hdr.end = true;
        hdr.err = "boom".to_string();
        hdr.custom = Some(
            serde_json::value::to_raw_value(&serde_json::json!({"k": [1, 2]})).unwrap(),
        );
        let pkt = Packet::new(hdr, &b"hello"[..]);

        let wire = pkt.encode().unwrap();
        let parsed = Packet::decode(&wire, None).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn test_roundtrip_empty() {
        let pkt = Packet::default();
        let wire = pkt.encode().unwrap();
        assert_eq!(&wire[..2], &[0, 2]);
        assert_eq!(&wire[2..], b"{}");
        let parsed = Packet::decode(&wire, None).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let mut hdr = Header::default();
        hdr.ack = Some(0);
        let json = serde_json::to_string(&hdr).unwrap();
        assert_eq!(json, r#"{"ack":0}"#);
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(
            Packet::decode(&[0, 1, b'{'], None),
            Err(WireError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_empty_header() {
        let pkt = Packet::decode(&[0, 2, b'{', b'}'], None).unwrap();
        assert_eq!(pkt.hdr, Header::default());
        assert!(pkt.body.is_empty());
    }

    #[test]
    fn test_decode_header_overrun() {
        // declares a 10-byte header inside a 4-byte frame
        assert!(matches!(
            Packet::decode(&[0, 10, b'{', b'}'], None),
            Err(WireError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_bad_json() {
        assert!(matches!(
            Packet::decode(&[0, 2, b'[', b']'], None),
            Err(WireError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_decode_body() {
        let frame = [&[0u8, 2][..], b"{}", b"body"].concat();
        let pkt = Packet::decode(&frame, None).unwrap();
        assert_eq!(&pkt.body[..], b"body");
    }

    #[test]
    fn test_just_ack() {
        let mut hdr = Header::default();
        assert!(!hdr.just_ack());

        hdr.ack = Some(4);
        assert!(hdr.just_ack());

        // c and miss may ride along
        hdr.c = "aa".to_string();
        hdr.miss = vec![2, 3];
        assert!(hdr.just_ack());
        assert!(Packet::new(hdr.clone(), &b""[..]).just_ack());

        // a body disqualifies the packet even if the header is pure
        assert!(!Packet::new(hdr.clone(), &b"x"[..]).just_ack());

        // any other field disqualifies the header
        let spoilers: [fn(&mut Header); 16] = [
            |h: &mut Header| h.typ = "x".into(),
            |h: &mut Header| h.line = "x".into(),
            |h: &mut Header| h.iv = "x".into(),
            |h: &mut Header| h.open = "x".into(),
            |h: &mut Header| h.sig = "x".into(),
            |h: &mut Header| h.to = "x".into(),
            |h: &mut Header| h.at = Some(1),
            |h: &mut Header| h.family = "x".into(),
            |h: &mut Header| h.seq = Some(1),
            |h: &mut Header| h.end = true,
            |h: &mut Header| h.err = "x".into(),
            |h: &mut Header| h.seek = "x".into(),
            |h: &mut Header| h.see = vec!["x".into()],
            |h: &mut Header| h.peer = "x".into(),
            |h: &mut Header| h.ip = "x".into(),
            |h: &mut Header| h.port = Some(1),
        ];
        for spoil in spoilers {
            let mut h = hdr.clone();
            spoil(&mut h);
            assert!(!h.just_ack(), "spoiled header still counted as just-ack");
        }

        let mut h = hdr.clone();
        h.custom =
            Some(serde_json::value::to_raw_value(&serde_json::json!({})).unwrap());
        assert!(!h.just_ack());
    }

    #[test]
    fn test_custom_as() {
        let mut hdr = Header::default();
        hdr.custom = Some(
            serde_json::value::to_raw_value(&serde_json::json!({"room": "lobby"})).unwrap(),
        );
        let pkt = Packet::new(hdr, &b""[..]);

        #[derive(serde::Deserialize)]
        struct App {
            room: String,
        }
        let app: Option<App> = pkt.custom_as().unwrap();
        assert_eq!(app.unwrap().room, "lobby");

        let bare: Option<App> = Packet::default().custom_as().unwrap();
        assert!(bare.is_none());
    }

    #[test]
    fn test_custom_carried_verbatim() {
        let raw = r#"{"nested":{"deep":[1,2,3]},"s":"v"}"#;
        let mut hdr = Header::default();
        hdr.custom = Some(RawValue::from_string(raw.to_string()).unwrap());
        let wire = Packet::new(hdr, &b""[..]).encode().unwrap();
        let parsed = Packet::decode(&wire, None).unwrap();
        assert_eq!(parsed.hdr.custom.as_deref().unwrap().get(), raw);
    }
}
