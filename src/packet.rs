//! Fixed 8-byte packet header, CRC verification, and the framer wrapping
//! that turns a `(type, seq, payload)` triple into wire bytes and back.

use crate::crc;
use crate::framer;

pub const VERSION: u8 = 3;
pub const MAX_PAYLOAD_LEN: usize = 65535;
const HEADER_LEN: usize = 8;

/// The three message kinds that flow over the link. A closed tagged sum:
/// any other wire value is simply not representable and decodes to
/// `None` at the call site, matching the "other values are dropped" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Req = 1,
    Resp = 2,
    Ack = 3,
}

impl PacketType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Req),
            2 => Some(Self::Resp),
            3 => Some(Self::Ack),
            _ => None,
        }
    }
}

/// Construct the wire bytes (SLIP-framed) for one packet.
///
/// # Panics
/// Panics if `payload.len() > MAX_PAYLOAD_LEN` - that is a programmer
/// error (the caller must size payloads before calling), not a runtime
/// condition the protocol needs to recover from.
pub fn pack(ty: PacketType, seq: u16, payload: &[u8]) -> Vec<u8> {
    let plen = payload.len();
    assert!(
        plen <= MAX_PAYLOAD_LEN,
        "payload of {plen} bytes exceeds MAX_PAYLOAD_LEN"
    );

    let mut header = [0u8; 6];
    header[0] = VERSION;
    header[1] = ty as u8;
    header[2..4].copy_from_slice(&seq.to_le_bytes());
    header[4..6].copy_from_slice(&(plen as u16).to_le_bytes());

    let mut crc_input = Vec::with_capacity(6 + plen);
    crc_input.extend_from_slice(&header);
    crc_input.extend_from_slice(payload);
    let crc = crc::crc16_ccitt_false(&crc_input, 0xFFFF);

    let mut raw = Vec::with_capacity(HEADER_LEN + plen);
    raw.extend_from_slice(&header);
    raw.extend_from_slice(&crc.to_le_bytes());
    raw.extend_from_slice(payload);

    framer::encode(&raw)
}

/// Parse a de-stuffed frame (the raw bytes already produced by
/// [`crate::framer::FrameDecoder`]) into `(type, seq, payload)`.
///
/// Every failure mode - truncated header, version mismatch, length
/// mismatch, CRC mismatch, unknown type - is a silent drop: the protocol
/// relies on retransmission, not error reporting, to recover.
pub fn unpack(raw: &[u8]) -> Option<(PacketType, u16, Vec<u8>)> {
    if raw.len() < HEADER_LEN {
        return None;
    }
    if raw[0] != VERSION {
        return None;
    }
    let ty = PacketType::from_u8(raw[1])?;
    let seq = u16::from_le_bytes([raw[2], raw[3]]);
    let plen = u16::from_le_bytes([raw[4], raw[5]]) as usize;
    if plen > MAX_PAYLOAD_LEN || raw.len() != HEADER_LEN + plen {
        return None;
    }
    let crc_wire = u16::from_le_bytes([raw[6], raw[7]]);
    let payload = &raw[HEADER_LEN..];

    let mut crc_input = Vec::with_capacity(6 + plen);
    crc_input.extend_from_slice(&raw[0..6]);
    crc_input.extend_from_slice(payload);
    let crc_calc = crc::crc16_ccitt_false(&crc_input, 0xFFFF);
    if crc_calc != crc_wire {
        return None;
    }

    Some((ty, seq, payload.to_vec()))
}
