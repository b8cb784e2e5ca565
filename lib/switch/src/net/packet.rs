use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde_json::{Map, Value};

use crate::net::shared::{NetError, NetResult, MAX_PACKET_SIZE};
use telehash_core::encoding::{base64, hex};

/// JSON header of a packet. Key order is not significant on the wire.
pub type Fields = Map<String, Value>;

/// Packet types the switch dispatches on. Registered at construction; a
/// datagram with any other `type` is dropped with a warning.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PacketKind {
    Open,
    Line,
}

/// Renders the length-prefixed wire layout:
/// `[2-byte BE header length][UTF-8 JSON header][body]`.
pub fn frame(json: &Fields, body: &[u8]) -> NetResult<Vec<u8>> {
    let header = serde_json::to_vec(json)?;

    if header.len() > u16::max_value() as usize {
        return Err(NetError::Malformed("header too large"));
    }

    let mut out = Vec::with_capacity(2 + header.len() + body.len());
    out.write_u16::<BigEndian>(header.len() as u16)?;
    out.extend_from_slice(&header);
    out.extend_from_slice(body);

    Ok(out)
}

/// Splits a datagram into its JSON header and body. The header must be a
/// non-empty JSON object.
pub fn unframe(buf: &[u8]) -> NetResult<(Fields, &[u8])> {
    let mut prefix = buf;
    if prefix.len() < 2 {
        return Err(NetError::Malformed("short packet"));
    }

    let header_len = prefix.read_u16::<BigEndian>()? as usize;

    if header_len == 0 {
        return Err(NetError::Malformed("empty header"));
    }

    if header_len > buf.len() - 2 {
        return Err(NetError::Malformed("header length out of bounds"));
    }

    let value: Value = serde_json::from_slice(&buf[2..2 + header_len])?;

    match value {
        Value::Object(json) => Ok((json, &buf[2 + header_len..])),
        _ => Err(NetError::Malformed("header is not an object")),
    }
}

/// Resolves the parser for a packet from its `type` field.
pub fn classify(json: &Fields) -> NetResult<PacketKind> {
    let kind = json
        .get("type")
        .and_then(Value::as_str)
        .ok_or(NetError::Malformed("missing type"))?;

    match kind {
        "open" => Ok(PacketKind::Open),
        "line" => Ok(PacketKind::Line),
        other => Err(NetError::UnknownType(other.to_string())),
    }
}

/// Reads a fixed-size lowercase hex field from a packet header.
pub fn hex_field<const N: usize>(json: &Fields, key: &'static str) -> NetResult<[u8; N]> {
    let text = json
        .get(key)
        .and_then(Value::as_str)
        .ok_or(NetError::Malformed(key))?;

    hex::decode_exact(text).map_err(|_| NetError::Malformed(key))
}

/// Reads a base64 field from a packet header.
pub fn b64_field(json: &Fields, key: &'static str) -> NetResult<Vec<u8>> {
    let text = json
        .get(key)
        .and_then(Value::as_str)
        .ok_or(NetError::Malformed(key))?;

    base64::decode(text).map_err(|_| NetError::Malformed(key))
}

/// Bounds check applied to every rendered datagram before it is queued.
pub fn check_size(packet: &[u8]) -> NetResult<()> {
    if packet.len() > MAX_PACKET_SIZE {
        return Err(NetError::Malformed("oversized packet"));
    }

    Ok(())
}
