//! Shared test-only event signing, mirroring `model::event::tests_support` but usable
//! from the integration-test crate, which can't reach a `pub(crate)` module.

use nostr_relay_engine::model::{Event, EventId, Kind, PublicKey, Tag};
use secp256k1::{rand, Keypair, Message};
use sha2::{Digest, Sha256};

pub fn keypair() -> Keypair {
    Keypair::new(secp256k1::SECP256K1, &mut rand::thread_rng())
}

pub fn pubkey_hex(keypair: &Keypair) -> String {
    hex::encode(keypair.x_only_public_key().0.serialize())
}

pub fn signed(keypair: &Keypair, kind: u16, content: &str, tags: Vec<Tag>, created_at: u64) -> Event {
    let (xonly, _) = keypair.x_only_public_key();
    let pubkey = PublicKey::from_hex(&hex::encode(xonly.serialize())).unwrap();
    let kind = Kind::new(kind);
    let canonical = Event::canonical(&pubkey, created_at, kind, &tags, content);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut id_bytes = [0u8; 32];
    id_bytes.copy_from_slice(&digest);
    let id = EventId::from_bytes(id_bytes);
    let msg = Message::from_digest_slice(&id_bytes).unwrap();
    let sig = secp256k1::SECP256K1.sign_schnorr(&msg, keypair);

    let json = serde_json::json!({
        "id": id.to_hex(),
        "pubkey": pubkey.to_hex(),
        "created_at": created_at,
        "kind": kind.as_u16(),
        "tags": tags,
        "content": content,
        "sig": hex::encode(sig.as_ref() as &[u8]),
    });
    serde_json::from_value(json).expect("hand-built event always deserializes")
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
