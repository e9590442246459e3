//! Per-connection context: identity, auth state, and the rate-limit token bucket
//! (§5 "Rate limiting"). Grounded on `nostr-relay-builder`'s `local::session::Tokens`,
//! generalized from a fixed per-minute quota to a configurable window.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::model::PublicKey;

/// A token bucket replenished linearly over a configured window, used to gate how many
/// `EVENT` submissions one connection may make.
pub struct TokenBucket {
    max_events: u32,
    window: Duration,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window,
            tokens: max_events as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if self.window.is_zero() {
            return;
        }
        let fraction = elapsed.as_secs_f64() / self.window.as_secs_f64();
        let replenished = fraction * self.max_events as f64;
        if replenished > 0.0 {
            self.tokens = (self.tokens + replenished).min(self.max_events as f64);
            self.last_refill = now;
        }
    }

    /// Attempt to spend one token; `false` means the caller is rate-limited.
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        self.refill(now);
        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

/// NIP-42 authentication state for one connection.
#[derive(Default)]
pub enum AuthState {
    #[default]
    Unchallenged,
    Challenged(String),
    Authenticated(PublicKey),
}

impl AuthState {
    pub fn pubkey(&self) -> Option<PublicKey> {
        match self {
            Self::Authenticated(pk) => Some(*pk),
            _ => None,
        }
    }
}

/// Everything the message handler needs to know about the connection it is servicing.
pub struct ConnectionContext {
    pub id: u64,
    pub remote_addr: Option<SocketAddr>,
    pub auth: AuthState,
    pub rate_limiter: TokenBucket,
}

impl ConnectionContext {
    pub fn new(id: u64, remote_addr: Option<SocketAddr>, max_events: u32, window: Duration) -> Self {
        Self {
            id,
            remote_addr,
            auth: AuthState::Unchallenged,
            rate_limiter: TokenBucket::new(max_events, window),
        }
    }

    pub fn authenticated_pubkey(&self) -> Option<PublicKey> {
        self.auth.pubkey()
    }
}
