//! Pithos wire format: one datagram carries exactly one frame.
//!
//! Every frame starts with a fixed 16-byte header. Multi-byte fields are
//! little-endian. The body that follows depends on the frame kind:
//!   - packet: the attached object's name as UTF-8 (empty if no object)
//!   - call: JSON-encoded `CallFrame`
//!   - response: JSON-encoded `ResponseFrame`
//!
//! The header is #[repr(C, packed)] and uses zerocopy derives, so encoding
//! and decoding it needs no unsafe code.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::address::TransportAddress;
use crate::object::StoredObject;
use crate::rpc::{CallFrame, ResponseFrame};
use crate::unit::{Intent, PayloadType, Unit};

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Wire size: 16 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// One of the `kind::*` constants.
    pub kind: u8,

    /// `PayloadType` byte for packets, zero for RPC frames.
    pub payload_type: u8,

    /// Bit flags:
    ///   bit 0: an object is attached (body holds its name)
    ///   bit 1: overlay-store intent
    ///   bits 2-7: reserved, must be zero
    pub flags: u8,

    /// Declared unit length for packets, body length for RPC frames.
    pub byte_length: u32,

    /// Declared size of the attached object, zero if none.
    pub object_size: u64,
}

assert_eq_size!(FrameHeader, [u8; 16]);

/// Frame kinds.
pub mod kind {
    pub const PACKET: u8 = 0x01;
    pub const CALL: u8 = 0x02;
    pub const RESPONSE: u8 = 0x03;
}

const FLAG_OBJECT: u8 = 0x01;
const FLAG_OVERLAY_STORE: u8 = 0x02;
const FLAGS_RESERVED: u8 = !(FLAG_OBJECT | FLAG_OVERLAY_STORE);

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current frame format version.
pub const FRAME_VERSION: u8 = 0x01;

/// Header size in bytes.
pub const HEADER_LEN: usize = 16;

/// Maximum body size. A frame must fit in one UDP datagram.
pub const MAX_BODY: usize = 65507 - HEADER_LEN;

// ── Frames ────────────────────────────────────────────────────────────────────

/// Everything that can travel in one datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Packet(Unit),
    Call(CallFrame),
    Response(ResponseFrame),
}

/// Encode a frame into a datagram.
pub fn encode(frame: &Frame) -> Result<Bytes, WireError> {
    match frame {
        Frame::Packet(unit) => encode_packet(unit),
        Frame::Call(call) => encode_json(kind::CALL, call),
        Frame::Response(response) => encode_json(kind::RESPONSE, response),
    }
}

/// Decode a datagram received from `source`.
///
/// Decoded packets carry `source` and an unspecified destination.
pub fn decode(source: TransportAddress, datagram: &[u8]) -> Result<Frame, WireError> {
    let header = FrameHeader::read_from_prefix(datagram).ok_or(WireError::Truncated {
        expected: HEADER_LEN,
        actual: datagram.len(),
    })?;
    let body = &datagram[HEADER_LEN..];

    if header.version != FRAME_VERSION {
        return Err(WireError::UnknownVersion(header.version));
    }

    match header.kind {
        kind::PACKET => decode_packet(&header, body, source).map(Frame::Packet),
        kind::CALL => decode_json(&header, body).map(Frame::Call),
        kind::RESPONSE => decode_json(&header, body).map(Frame::Response),
        other => Err(WireError::UnknownFrameKind(other)),
    }
}

fn encode_packet(unit: &Unit) -> Result<Bytes, WireError> {
    let mut flags = 0u8;
    let (name, object_size) = match &unit.object {
        Some(object) => {
            flags |= FLAG_OBJECT;
            (object.name().as_bytes(), object.size())
        }
        None => (&[][..], 0),
    };
    if unit.intent == Intent::OverlayStore {
        flags |= FLAG_OVERLAY_STORE;
    }
    if name.len() > MAX_BODY {
        return Err(WireError::BodyTooLarge(name.len()));
    }

    let header = FrameHeader {
        version: FRAME_VERSION,
        kind: kind::PACKET,
        payload_type: unit.payload_type.into(),
        flags,
        byte_length: unit.byte_length.to_le(),
        object_size: object_size.to_le(),
    };
    Ok(assemble(&header, name))
}

fn decode_packet(
    header: &FrameHeader,
    body: &[u8],
    source: TransportAddress,
) -> Result<Unit, WireError> {
    let payload_type = PayloadType::try_from(header.payload_type)?;
    let flags = header.flags;
    if flags & FLAGS_RESERVED != 0 {
        return Err(WireError::ReservedFlagsSet(flags));
    }

    let mut unit = Unit::new(
        payload_type,
        TransportAddress::UNSPECIFIED,
        u32::from_le(header.byte_length),
    )
    .with_source(source);

    if flags & FLAG_OVERLAY_STORE != 0 {
        unit = unit.with_intent(Intent::OverlayStore);
    }
    if flags & FLAG_OBJECT != 0 {
        let name = std::str::from_utf8(body).map_err(|_| WireError::InvalidObjectName)?;
        let object = StoredObject::new(name, u64::from_le(header.object_size))
            .map_err(|_| WireError::InvalidObjectName)?;
        unit = unit.with_object(object);
    } else if !body.is_empty() {
        return Err(WireError::UnexpectedBody(body.len()));
    }
    Ok(unit)
}

fn encode_json<T: serde::Serialize>(frame_kind: u8, value: &T) -> Result<Bytes, WireError> {
    let body = serde_json::to_vec(value).map_err(|e| WireError::MalformedBody(e.to_string()))?;
    if body.len() > MAX_BODY {
        return Err(WireError::BodyTooLarge(body.len()));
    }
    let header = FrameHeader {
        version: FRAME_VERSION,
        kind: frame_kind,
        payload_type: 0,
        flags: 0,
        byte_length: (body.len() as u32).to_le(),
        object_size: 0,
    };
    Ok(assemble(&header, &body))
}

fn decode_json<T: serde::de::DeserializeOwned>(
    header: &FrameHeader,
    body: &[u8],
) -> Result<T, WireError> {
    let declared = u32::from_le(header.byte_length) as usize;
    if declared != body.len() {
        return Err(WireError::Truncated {
            expected: HEADER_LEN + declared,
            actual: HEADER_LEN + body.len(),
        });
    }
    serde_json::from_slice(body).map_err(|e| WireError::MalformedBody(e.to_string()))
}

fn assemble(header: &FrameHeader, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(body);
    buf.freeze()
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownFrameKind(u8),

    #[error("unknown payload type: {0}")]
    UnknownPayloadType(u8),

    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("body length {0} exceeds maximum {}", MAX_BODY)]
    BodyTooLarge(usize),

    #[error("packet without object carries a {0}-byte body")]
    UnexpectedBody(usize),

    #[error("attached object name is empty or not UTF-8")]
    InvalidObjectName,

    #[error("malformed frame body: {0}")]
    MalformedBody(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
