//! Negentropy set-reconciliation, IdList mode only (§4.9).
//!
//! The wire format is a thin framing this relay speaks natively rather than delegating
//! to the external `negentropy` crate, since IdList mode needs none of the fingerprint
//! machinery the full protocol defines: `version(0x61) | Bound | mode-varint | payload`,
//! with `Bound = timestamp-varint | prefix-len-varint | prefix-bytes` and `mode=2` meaning
//! a plain list of ids. The relay always answers with a single range bounded by infinity
//! (`timestamp=0, prefix-len=0`), carrying every id the query filter selects.

use crate::model::EventId;

pub const VERSION: u8 = 0x61;
const MODE_ID_LIST: u64 = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NegentropyError {
    #[error("message is empty")]
    Empty,
    #[error("unsupported version byte {0:#x}")]
    UnsupportedVersion(u8),
    #[error("message is truncated")]
    Truncated,
    #[error("unsupported mode {0}, only IdList (2) is implemented")]
    UnsupportedMode(u64),
    #[error("invalid hex payload")]
    InvalidHex,
}

fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    let mut bytes = Vec::new();
    loop {
        bytes.push((value & 0x7f) as u8);
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for (i, byte) in bytes.iter().rev().enumerate() {
        let continuation = if i + 1 < bytes.len() { 0x80 } else { 0 };
        out.push(byte | continuation);
    }
}

fn decode_varint(buf: &[u8], pos: &mut usize) -> Result<u64, NegentropyError> {
    let mut value: u64 = 0;
    loop {
        let byte = *buf.get(*pos).ok_or(NegentropyError::Truncated)?;
        *pos += 1;
        value = (value << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

/// A range boundary: a timestamp and an id-prefix. The "infinity" bound (used to close a
/// range with no upper limit) is `timestamp=0, prefix=[]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub timestamp: u64,
    pub prefix: Vec<u8>,
}

impl Bound {
    pub fn infinity() -> Self {
        Self {
            timestamp: 0,
            prefix: Vec::new(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        encode_varint(self.timestamp, out);
        encode_varint(self.prefix.len() as u64, out);
        out.extend_from_slice(&self.prefix);
    }

    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, NegentropyError> {
        let timestamp = decode_varint(buf, pos)?;
        let prefix_len = decode_varint(buf, pos)? as usize;
        let end = pos.checked_add(prefix_len).ok_or(NegentropyError::Truncated)?;
        let prefix = buf.get(*pos..end).ok_or(NegentropyError::Truncated)?.to_vec();
        *pos = end;
        Ok(Self { timestamp, prefix })
    }
}

/// A decoded IdList-mode frame: the range boundary plus every id it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdListFrame {
    pub bound: Bound,
    pub ids: Vec<EventId>,
}

impl IdListFrame {
    /// Build the relay's full-answer frame: an infinity bound carrying every supplied id.
    pub fn full(ids: Vec<EventId>) -> Self {
        Self {
            bound: Bound::infinity(),
            ids,
        }
    }

    /// Encode to the hex string the wire protocol carries inside `NEG-MSG`.
    pub fn to_hex(&self) -> String {
        let mut out = Vec::new();
        out.push(VERSION);
        self.bound.encode(&mut out);
        encode_varint(MODE_ID_LIST, &mut out);
        encode_varint(self.ids.len() as u64, &mut out);
        for id in &self.ids {
            out.extend_from_slice(id.as_bytes());
        }
        hex::encode(out)
    }

    /// Decode a hex-encoded frame received from a client.
    pub fn from_hex(hex_str: &str) -> Result<Self, NegentropyError> {
        let bytes = hex::decode(hex_str).map_err(|_| NegentropyError::InvalidHex)?;
        if bytes.is_empty() {
            return Err(NegentropyError::Empty);
        }
        let version = bytes[0];
        if version != VERSION {
            return Err(NegentropyError::UnsupportedVersion(version));
        }
        let mut pos = 1;
        let bound = Bound::decode(&bytes, &mut pos)?;
        let mode = decode_varint(&bytes, &mut pos)?;
        if mode != MODE_ID_LIST {
            return Err(NegentropyError::UnsupportedMode(mode));
        }
        let count = decode_varint(&bytes, &mut pos)? as usize;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let end = pos.checked_add(32).ok_or(NegentropyError::Truncated)?;
            let slice = bytes.get(pos..end).ok_or(NegentropyError::Truncated)?;
            let mut id_bytes = [0u8; 32];
            id_bytes.copy_from_slice(slice);
            ids.push(EventId::from_bytes(id_bytes));
            pos = end;
        }
        Ok(Self { bound, ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_empty_list() {
        let frame = IdListFrame::full(vec![]);
        let hex_str = frame.to_hex();
        let decoded = IdListFrame::from_hex(&hex_str).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.bound, Bound::infinity());
    }

    #[test]
    fn round_trips_a_populated_list() {
        let ids = vec![EventId::from_bytes([1; 32]), EventId::from_bytes([2; 32])];
        let frame = IdListFrame::full(ids.clone());
        let decoded = IdListFrame::from_hex(&frame.to_hex()).unwrap();
        assert_eq!(decoded.ids, ids);
    }

    #[test]
    fn rejects_bad_version_byte() {
        let err = IdListFrame::from_hex("00").unwrap_err();
        assert_eq!(err, NegentropyError::UnsupportedVersion(0x00));
    }

    #[test]
    fn varint_round_trips_multi_byte_values() {
        let mut out = Vec::new();
        encode_varint(300, &mut out);
        let mut pos = 0;
        assert_eq!(decode_varint(&out, &mut pos).unwrap(), 300);
    }
}
