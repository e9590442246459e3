//! The signed, immutable event record and its canonical hash.

use std::fmt;

use secp256k1::schnorr::Signature;
use secp256k1::{Message, XOnlyPublicKey};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::kind::Kind;
use super::tag::Tag;

/// 32-byte x-only Schnorr public key, hex-encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(XOnlyPublicKey);

impl PublicKey {
    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let bytes = decode_fixed::<32>(s)?;
        XOnlyPublicKey::from_slice(&bytes)
            .map(Self)
            .map_err(|_| CodecError::InvalidPublicKey)
    }

    #[inline]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.serialize())
    }

    #[inline]
    pub fn inner(&self) -> &XOnlyPublicKey {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::from_hex(&s).map_err(DeError::custom)
    }
}

/// 32-byte canonical content hash: `SHA256(json([0,pubkey,created_at,kind,tags,content]))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId([u8; 32]);

impl EventId {
    #[inline]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        Ok(Self(decode_fixed::<32>(s)?))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[inline]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// `true` if `self.to_hex()` starts with `prefix` (case-sensitive, lowercase hex).
    pub fn starts_with_hex(&self, prefix: &str) -> bool {
        self.to_hex().starts_with(prefix)
    }

    /// Number of leading zero bits, used for NIP-13 proof-of-work gating.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut bits = 0u32;
        for byte in self.0 {
            if byte == 0 {
                bits += 8;
            } else {
                bits += byte.leading_zeros();
                break;
            }
        }
        bits
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::from_hex(&s).map_err(DeError::custom)
    }
}

/// Decode/encode failure for a fixed-width hex field.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid hex")]
    InvalidHex,
    #[error("wrong length, expected {0} bytes")]
    WrongLength(usize),
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature")]
    InvalidSignature,
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], CodecError> {
    let v = hex::decode(s).map_err(|_| CodecError::InvalidHex)?;
    if v.len() != N {
        return Err(CodecError::WrongLength(N));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&v);
    Ok(out)
}

/// A signed, immutable event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: Kind,
    pub tags: Vec<Tag>,
    pub content: String,
    #[serde(with = "sig_hex")]
    pub sig: Signature,
}

mod sig_hex {
    use secp256k1::schnorr::Signature;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(sig: &Signature, s: S) -> Result<S::Ok, S::Error> {
        hex::encode(sig.as_ref() as &[u8]).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Signature, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Signature::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

impl Event {
    /// Canonical serialization used to compute the id: `[0,pubkey,created_at,kind,tags,content]`
    /// with no extra whitespace, preserving array order.
    pub fn canonical(
        pubkey: &PublicKey,
        created_at: u64,
        kind: Kind,
        tags: &[Tag],
        content: &str,
    ) -> String {
        let value = Value::Array(vec![
            Value::from(0),
            Value::String(pubkey.to_hex()),
            Value::from(created_at),
            Value::from(kind.as_u16()),
            serde_json::to_value(tags).expect("tags are always serializable"),
            Value::String(content.to_string()),
        ]);
        value.to_string()
    }

    /// Recompute the canonical hash of `self`'s fields (ignoring the stored `id`).
    pub fn compute_id(&self) -> EventId {
        let canonical = Self::canonical(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        );
        let digest = Sha256::digest(canonical.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        EventId::from_bytes(bytes)
    }

    /// `id == H(canonical(self))`.
    #[inline]
    pub fn verify_id(&self) -> bool {
        self.compute_id() == self.id
    }

    /// Schnorr-verify `sig` over `id` under `pubkey`.
    pub fn verify_signature(&self) -> bool {
        let Ok(msg) = Message::from_digest_slice(self.id.as_bytes()) else {
            return false;
        };
        secp256k1::SECP256K1
            .verify_schnorr(&self.sig, &msg, self.pubkey.inner())
            .is_ok()
    }

    /// Both the id and signature invariants hold.
    #[inline]
    pub fn verify(&self) -> bool {
        self.verify_id() && self.verify_signature()
    }

    /// First value of the first tag named `name`, if any.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name() == name)
            .and_then(Tag::value)
    }

    /// All tag values for tags named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.name() == name)
            .filter_map(Tag::value)
    }

    /// The `d`-tag value used for addressable-event identity; empty string if absent.
    pub fn identifier(&self) -> &str {
        self.first_tag_value("d").unwrap_or("")
    }

    /// `true` if this event carries a `-` protected-event marker tag (NIP-70).
    pub fn is_protected(&self) -> bool {
        self.tags.iter().any(Tag::is_protected)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::tests_support::signed as signed_event;

    #[test]
    fn round_trips_and_verifies() {
        let event = signed_event(1, "hello", vec![], 100);
        assert!(event.verify());
        let json = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn tampered_content_fails_id_check() {
        let mut event = signed_event(1, "hello", vec![], 100);
        event.content = "tampered".to_string();
        assert!(!event.verify_id());
    }

    #[test]
    fn identifier_defaults_to_empty() {
        let event = signed_event(30_000, "x", vec![], 1);
        assert_eq!(event.identifier(), "");
        let event = signed_event(30_000, "x", vec![Tag::identifier("abc")], 1);
        assert_eq!(event.identifier(), "abc");
    }
}
