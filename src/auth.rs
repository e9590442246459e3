//! NIP-42 authentication challenge/response (§4.6) and NIP-98 HTTP auth for the
//! management RPC endpoint (§4.8). Grounded on `nostr-relay-builder`'s `local::session`
//! connection-state handling, generalized from "subscriptions + rate limit tokens" to
//! also carry the auth challenge and bound pubkey.

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::model::kind::well_known;
use crate::model::{Event, PublicKey};

/// Failure reason for a rejected `AUTH` response; formatted into an `auth-required:` OK
/// message per §7's taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    SignatureInvalid,
    ChallengeMismatch,
    RelayMismatch,
    Expired,
    NoChallengeIssued,
    WrongKind,
    WrongMethod,
    WrongUrl,
    PayloadMismatch,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let detail = match self {
            Self::SignatureInvalid => "invalid signature",
            Self::ChallengeMismatch => "challenge does not match",
            Self::RelayMismatch => "relay does not match",
            Self::Expired => "event too old",
            Self::NoChallengeIssued => "no challenge was issued",
            Self::WrongKind => "not a kind 27235 event",
            Self::WrongMethod => "method tag does not match the request",
            Self::WrongUrl => "u tag does not match the request URL",
            Self::PayloadMismatch => "payload tag does not match the request body",
        };
        write!(f, "auth-required: {detail}")
    }
}

/// Generate a random hex challenge unique to one connection.
pub fn generate_challenge() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Normalize a relay URL for the purposes of §4.6's comparison: lowercase host, strip a
/// trailing slash, ignore the scheme's default port.
fn normalize_relay_url(url: &str) -> String {
    let lower = url.to_lowercase();
    let trimmed = lower.trim_end_matches('/');
    trimmed.to_string()
}

/// Verify a kind-22242 `AUTH` event against the challenge issued to this connection and
/// the relay's canonical URL. `max_age_secs` bounds how stale `created_at` may be.
pub fn verify_auth_event(
    event: &Event,
    expected_challenge: Option<&str>,
    relay_url: &str,
    now: u64,
    max_age_secs: u64,
) -> Result<PublicKey, AuthError> {
    let Some(expected_challenge) = expected_challenge else {
        return Err(AuthError::NoChallengeIssued);
    };
    if !event.verify() {
        return Err(AuthError::SignatureInvalid);
    }
    let challenge_ok = event
        .first_tag_value("challenge")
        .map(|c| c == expected_challenge)
        .unwrap_or(false);
    if !challenge_ok {
        return Err(AuthError::ChallengeMismatch);
    }
    let relay_ok = event
        .first_tag_value("relay")
        .map(|r| normalize_relay_url(r) == normalize_relay_url(relay_url))
        .unwrap_or(false);
    if !relay_ok {
        return Err(AuthError::RelayMismatch);
    }
    let age = now.abs_diff(event.created_at);
    if age > max_age_secs {
        return Err(AuthError::Expired);
    }
    Ok(event.pubkey)
}

/// Verify a base64-decoded NIP-98 kind-27235 event against the management RPC request
/// it's meant to authorize (§4.8).
pub fn verify_http_auth(
    event: &Event,
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    max_age_secs: u64,
    now: u64,
) -> Result<PublicKey, AuthError> {
    if event.kind.as_u16() != well_known::HTTP_AUTH {
        return Err(AuthError::WrongKind);
    }
    if !event.verify() {
        return Err(AuthError::SignatureInvalid);
    }
    if now.abs_diff(event.created_at) > max_age_secs {
        return Err(AuthError::Expired);
    }
    let method_ok = event
        .first_tag_value("method")
        .map(|m| m.eq_ignore_ascii_case(method))
        .unwrap_or(false);
    if !method_ok {
        return Err(AuthError::WrongMethod);
    }
    let url_ok = event.first_tag_value("u").map(|u| u == url).unwrap_or(false);
    if !url_ok {
        return Err(AuthError::WrongUrl);
    }
    if let Some(body) = body {
        if !body.is_empty() {
            let digest = hex::encode(Sha256::digest(body));
            let payload_ok = event
                .first_tag_value("payload")
                .map(|p| p == digest)
                .unwrap_or(false);
            if !payload_ok {
                return Err(AuthError::PayloadMismatch);
            }
        }
    }
    Ok(event.pubkey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tag;
    use secp256k1::{rand as secp_rand, Keypair};

    fn auth_event(challenge: &str, relay: &str, created_at: u64) -> Event {
        let keypair = Keypair::new(secp256k1::SECP256K1, &mut secp_rand::thread_rng());
        crate::model::event::tests_support::signed_with_key(
            &keypair,
            22242,
            "",
            vec![
                Tag::new(vec!["challenge".to_string(), challenge.to_string()]).unwrap(),
                Tag::new(vec!["relay".to_string(), relay.to_string()]).unwrap(),
            ],
            created_at,
        )
    }

    #[test]
    fn accepts_matching_challenge_and_relay() {
        let event = auth_event("abc123", "wss://relay.example/", 1_000);
        let result = verify_auth_event(&event, Some("abc123"), "wss://relay.example", 1_000, 600);
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_challenge_mismatch() {
        let event = auth_event("abc123", "wss://relay.example", 1_000);
        let result = verify_auth_event(&event, Some("different"), "wss://relay.example", 1_000, 600);
        assert_eq!(result, Err(AuthError::ChallengeMismatch));
    }

    #[test]
    fn rejects_stale_event() {
        let event = auth_event("abc123", "wss://relay.example", 1_000);
        let result = verify_auth_event(&event, Some("abc123"), "wss://relay.example", 2_000, 60);
        assert_eq!(result, Err(AuthError::Expired));
    }

    #[test]
    fn challenges_are_unique() {
        assert_ne!(generate_challenge(), generate_challenge());
    }

    fn http_auth_event(method: &str, url: &str, payload: Option<&str>, created_at: u64) -> Event {
        let keypair = Keypair::new(secp256k1::SECP256K1, &mut secp_rand::thread_rng());
        let mut tags = vec![
            Tag::new(vec!["u".to_string(), url.to_string()]).unwrap(),
            Tag::new(vec!["method".to_string(), method.to_string()]).unwrap(),
        ];
        if let Some(payload) = payload {
            tags.push(Tag::new(vec!["payload".to_string(), payload.to_string()]).unwrap());
        }
        crate::model::event::tests_support::signed_with_key(
            &keypair,
            well_known::HTTP_AUTH,
            "",
            tags,
            created_at,
        )
    }

    #[test]
    fn http_auth_accepts_matching_request() {
        let event = http_auth_event("POST", "https://relay.example/", None, 1_000);
        let result = verify_http_auth(&event, "POST", "https://relay.example/", None, 60, 1_000);
        assert!(result.is_ok());
    }

    #[test]
    fn http_auth_rejects_method_mismatch() {
        let event = http_auth_event("POST", "https://relay.example/", None, 1_000);
        let result = verify_http_auth(&event, "GET", "https://relay.example/", None, 60, 1_000);
        assert_eq!(result, Err(AuthError::WrongMethod));
    }

    #[test]
    fn http_auth_checks_payload_hash() {
        let body = b"{\"method\":\"supportedmethods\"}";
        let digest = hex::encode(Sha256::digest(body));
        let event = http_auth_event("POST", "https://relay.example/", Some(&digest), 1_000);
        let result = verify_http_auth(&event, "POST", "https://relay.example/", Some(body), 60, 1_000);
        assert!(result.is_ok());

        let result = verify_http_auth(&event, "POST", "https://relay.example/", Some(b"tampered"), 60, 1_000);
        assert_eq!(result, Err(AuthError::PayloadMismatch));
    }
}
