//! Relay configuration (§12). Grounded on `nostr-relay-builder`'s `RelayBuilder`:
//! explicit builder calls always win over environment defaults.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::model::PublicKey;
use crate::policy::builtin::{
    AdministrativeDeny, AuthKindShadow, ContentLengthBound, ProofOfWork, ProtectedEvents,
    SignatureVerification, TagCountBound, TimeBounds,
};
use crate::policy::{NipModule, Registry};
use crate::store::memory::MemoryStore;
use crate::store::EventStore;

/// A connection's accepted rate of `EVENT` submissions (§5 "Rate limiting").
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_events: u32,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_events: env_u32("RELAY_RL_MAX_EVENTS").unwrap_or(60),
            window: Duration::from_millis(env_u64("RELAY_RL_WINDOW_MS").unwrap_or(60_000)),
        }
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

/// Single-owner deployment mode (§14): only events authored by or tagging `owner` are
/// accepted and broadcast.
#[derive(Debug, Clone, Copy)]
pub enum RelayMode {
    Open,
    PublicKey(PublicKey),
}

impl Default for RelayMode {
    fn default() -> Self {
        Self::Open
    }
}

/// Protocol-level bounds enforced by built-in policies and surfaced in the NIP-11
/// information document.
#[derive(Debug, Clone)]
pub struct Bounds {
    pub max_message_length: usize,
    pub max_subscriptions: usize,
    pub max_event_tags: usize,
    pub max_content_length: usize,
    pub max_future_secs: Option<u64>,
    pub max_past_secs: Option<u64>,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            max_message_length: env_usize("RELAY_MAX_MESSAGE_LENGTH").unwrap_or(128 * 1024),
            max_subscriptions: env_usize("RELAY_MAX_SUBSCRIPTIONS").unwrap_or(20),
            max_event_tags: env_usize("RELAY_MAX_EVENT_TAGS").unwrap_or(2_000),
            max_content_length: env_usize("RELAY_MAX_CONTENT_LENGTH").unwrap_or(64 * 1024),
            max_future_secs: Some(env_u64("RELAY_MAX_FUTURE_SECS").unwrap_or(900)),
            max_past_secs: None,
        }
    }
}

/// Assembled, immutable relay configuration.
pub struct RelayConfig {
    pub addr: IpAddr,
    pub port: Option<u16>,
    pub relay_url: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub admin_pubkey: Option<PublicKey>,
    pub mode: RelayMode,
    pub rate_limit: RateLimit,
    pub bounds: Bounds,
    pub require_auth: bool,
    pub min_pow: Option<u8>,
    pub auth_max_age_secs: u64,
    pub store: Arc<dyn EventStore>,
    pub registry: Registry,
}

/// Builds a [`RelayConfig`], the way `RelayBuilder` assembles `InnerLocalRelay`'s
/// configuration: explicit calls layered over environment-derived defaults.
pub struct RelayBuilder {
    addr: IpAddr,
    port: Option<u16>,
    relay_url: String,
    name: Option<String>,
    description: Option<String>,
    icon: Option<String>,
    admin_pubkey: Option<PublicKey>,
    mode: RelayMode,
    rate_limit: RateLimit,
    bounds: Bounds,
    require_auth: bool,
    min_pow: Option<u8>,
    auth_max_age_secs: u64,
    store: Option<Arc<dyn EventStore>>,
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self {
            addr: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            port: None,
            relay_url: "ws://localhost".to_string(),
            name: None,
            description: None,
            icon: None,
            admin_pubkey: None,
            mode: RelayMode::default(),
            rate_limit: RateLimit::default(),
            bounds: Bounds::default(),
            require_auth: false,
            min_pow: None,
            auth_max_age_secs: 600,
            store: None,
        }
    }
}

impl RelayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn addr(mut self, addr: IpAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn admin_pubkey(mut self, pubkey: PublicKey) -> Self {
        self.admin_pubkey = Some(pubkey);
        self
    }

    pub fn mode(mut self, mode: RelayMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn require_auth(mut self, require: bool) -> Self {
        self.require_auth = require;
        self
    }

    pub fn min_pow(mut self, difficulty: u8) -> Self {
        self.min_pow = Some(difficulty);
        self
    }

    pub fn store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Assemble the baseline NIP-module set: core validation (NIP-01) always active,
    /// NIP-70 protected events, NIP-13 proof-of-work if configured, and an administrative
    /// deny-list module backed by `admin`.
    fn default_registry(&self, admin: Arc<crate::admin::AdminService>) -> Registry {
        let mut registry = Registry::new();

        let mut core = NipModule::new("core", vec![1])
            .with_write_policy(Arc::new(SignatureVerification))
            .with_write_policy(Arc::new(ContentLengthBound {
                max_len: self.bounds.max_content_length,
            }))
            .with_write_policy(Arc::new(TagCountBound {
                max_tags: self.bounds.max_event_tags,
            }))
            .with_write_policy(Arc::new(TimeBounds {
                max_future_secs: self.bounds.max_future_secs,
                max_past_secs: self.bounds.max_past_secs,
            }))
            .with_write_policy(Arc::new(AdministrativeDeny { admin }));
        if let Some(difficulty) = self.min_pow {
            core = core.with_write_policy(Arc::new(ProofOfWork {
                min_difficulty: difficulty,
            }));
        }
        registry.register(core);

        registry.register(
            NipModule::new("auth", vec![42]).with_kinds([crate::model::kind::well_known::AUTHENTICATION])
                .with_write_policy(Arc::new(AuthKindShadow)),
        );
        // Deliberately not kind-scoped: the NIP-70 `-` marker tag can appear on an event
        // of any kind, so this module must inspect every submission's tags.
        registry.register(NipModule::new("protected-events", vec![70]).with_write_policy(Arc::new(ProtectedEvents)));
        registry.register(NipModule::new("deletion", vec![9]));
        registry.register(NipModule::new("vanish", vec![62]));
        registry.register(NipModule::new("search", vec![50]));
        registry.register(NipModule::new("negentropy", vec![77]));
        registry.register(NipModule::new("management-rpc", vec![86]));
        if self.min_pow.is_some() {
            registry.register(NipModule::new("pow", vec![13]));
        }
        registry
    }

    /// Finish building. `admin` is threaded in separately because the administrative
    /// state is also needed by the management RPC handler, outside the registry.
    pub fn build(self, admin: Arc<crate::admin::AdminService>) -> RelayConfig {
        let store = self
            .store
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let registry = self.default_registry(admin);
        RelayConfig {
            addr: self.addr,
            port: self.port,
            relay_url: self.relay_url,
            name: self.name,
            description: self.description,
            icon: self.icon,
            admin_pubkey: self.admin_pubkey,
            mode: self.mode,
            rate_limit: self.rate_limit,
            bounds: self.bounds,
            require_auth: self.require_auth,
            min_pow: self.min_pow,
            auth_max_age_secs: self.auth_max_age_secs,
            store,
            registry,
        }
    }
}
