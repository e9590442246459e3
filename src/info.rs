//! NIP-11 relay information document (§4.10).

use serde::Serialize;

use crate::model::PublicKey;
use crate::policy::Registry;

/// Server-enforced limits surfaced to clients so they can shape requests accordingly.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Limitation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_subscriptions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_event_tags: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_content_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at_lower_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at_upper_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_pow_difficulty: Option<u8>,
}

/// One retention rule, applied to a kind range or to everything if `kinds` is empty.
#[derive(Debug, Clone, Serialize)]
pub struct RetentionRule {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

/// One fee schedule entry (admission, publication, or subscription fees).
#[derive(Debug, Clone, Serialize)]
pub struct FeeSchedule {
    pub amount: u64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub kinds: Vec<u16>,
}

/// The NIP-11 document itself.
#[derive(Debug, Clone, Serialize)]
pub struct RelayInformation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<PublicKey>,
    pub software: String,
    pub version: String,
    pub supported_nips: Vec<u16>,
    pub limitation: Limitation,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub retention: Vec<RetentionRule>,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty", default)]
    pub fees: std::collections::HashMap<String, Vec<FeeSchedule>>,
}

/// Static identity; the version tracks the crate's own `CARGO_PKG_VERSION`.
pub const SOFTWARE: &str = "https://github.com/example/nostr-relay-engine";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

impl RelayInformation {
    /// Assemble the document from the registry's advertised NIPs plus caller-supplied
    /// metadata and limits. The registry's per-module capability fragments are merged
    /// into `limitation` and `retention`/`fees` left to the caller, since those aren't
    /// module-scoped concerns.
    pub fn build(
        registry: &Registry,
        name: Option<String>,
        description: Option<String>,
        icon: Option<String>,
        admin_pubkey: Option<PublicKey>,
        limitation: Limitation,
    ) -> Self {
        Self {
            name,
            description,
            icon,
            pubkey: admin_pubkey,
            software: SOFTWARE.to_string(),
            version: VERSION.to_string(),
            supported_nips: registry.supported_nips(),
            limitation,
            retention: Vec::new(),
            fees: std::collections::HashMap::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("RelayInformation is always serializable")
    }
}
