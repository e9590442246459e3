//! Administrative state (§4.8, §5): banned/allowed pubkeys, events, kinds and blocked
//! IPs, shared-mutable behind a lock, with writers publishing atomically and readers
//! taking a consistent snapshot.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::RwLock;

use crate::model::{EventId, PublicKey};

#[derive(Default)]
struct Lists {
    banned_pubkeys: HashSet<PublicKey>,
    allowed_pubkeys: HashSet<PublicKey>,
    banned_events: HashSet<EventId>,
    allowed_events: HashSet<EventId>,
    allowed_kinds: HashSet<u16>,
    blocked_ips: HashSet<IpAddr>,
}

/// Relay display metadata mutable at runtime through the management RPC (§4.8's
/// `changerelay*` methods).
#[derive(Default, Clone)]
pub struct RelayMeta {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
}

/// Shared administrative state consulted by [`crate::policy::builtin::AdministrativeDeny`]
/// and mutated by the management RPC handler.
#[derive(Default)]
pub struct AdminService {
    lists: RwLock<Lists>,
    meta: RwLock<RelayMeta>,
}

impl AdminService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban_pubkey(&self, pubkey: PublicKey) {
        self.lists.write().unwrap().banned_pubkeys.insert(pubkey);
    }

    pub fn allow_pubkey(&self, pubkey: PublicKey) {
        let mut lists = self.lists.write().unwrap();
        lists.banned_pubkeys.remove(&pubkey);
        lists.allowed_pubkeys.insert(pubkey);
    }

    pub fn is_pubkey_banned(&self, pubkey: &PublicKey) -> bool {
        self.lists.read().unwrap().banned_pubkeys.contains(pubkey)
    }

    pub fn list_banned_pubkeys(&self) -> Vec<String> {
        self.lists
            .read()
            .unwrap()
            .banned_pubkeys
            .iter()
            .map(PublicKey::to_hex)
            .collect()
    }

    pub fn list_allowed_pubkeys(&self) -> Vec<String> {
        self.lists
            .read()
            .unwrap()
            .allowed_pubkeys
            .iter()
            .map(PublicKey::to_hex)
            .collect()
    }

    pub fn ban_event(&self, id: EventId) {
        self.lists.write().unwrap().banned_events.insert(id);
    }

    pub fn allow_event(&self, id: EventId) {
        let mut lists = self.lists.write().unwrap();
        lists.banned_events.remove(&id);
        lists.allowed_events.insert(id);
    }

    pub fn is_event_banned(&self, id: &EventId) -> bool {
        self.lists.read().unwrap().banned_events.contains(id)
    }

    pub fn list_banned_events(&self) -> Vec<String> {
        self.lists
            .read()
            .unwrap()
            .banned_events
            .iter()
            .map(EventId::to_hex)
            .collect()
    }

    pub fn allow_kind(&self, kind: u16) {
        self.lists.write().unwrap().allowed_kinds.insert(kind);
    }

    pub fn disallow_kind(&self, kind: u16) {
        self.lists.write().unwrap().allowed_kinds.remove(&kind);
    }

    pub fn list_allowed_kinds(&self) -> Vec<u16> {
        let mut kinds: Vec<u16> = self.lists.read().unwrap().allowed_kinds.iter().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn block_ip(&self, ip: IpAddr) {
        self.lists.write().unwrap().blocked_ips.insert(ip);
    }

    pub fn unblock_ip(&self, ip: IpAddr) {
        self.lists.write().unwrap().blocked_ips.remove(&ip);
    }

    pub fn is_ip_blocked(&self, ip: &IpAddr) -> bool {
        self.lists.read().unwrap().blocked_ips.contains(ip)
    }

    pub fn list_blocked_ips(&self) -> Vec<String> {
        self.lists
            .read()
            .unwrap()
            .blocked_ips
            .iter()
            .map(IpAddr::to_string)
            .collect()
    }

    pub fn set_name(&self, name: String) {
        self.meta.write().unwrap().name = Some(name);
    }

    pub fn set_description(&self, description: String) {
        self.meta.write().unwrap().description = Some(description);
    }

    pub fn set_icon(&self, icon: String) {
        self.meta.write().unwrap().icon = Some(icon);
    }

    pub fn meta(&self) -> RelayMeta {
        self.meta.read().unwrap().clone()
    }
}

/// Failure dispatching one management RPC call (§4.8): always surfaced as
/// `{"error": ...}` with HTTP 200, except for `UnknownMethod` which callers map to a
/// distinct status if desired.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

fn param_str(params: &[serde_json::Value], index: usize) -> Result<&str, RpcError> {
    params
        .get(index)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| RpcError::InvalidParams(format!("expected a string at position {index}")))
}

fn param_u16(params: &[serde_json::Value], index: usize) -> Result<u16, RpcError> {
    params
        .get(index)
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| RpcError::InvalidParams(format!("expected a kind number at position {index}")))
}

/// Dispatch one management RPC call (§4.8). `supportedmethods` is handled by the caller,
/// since it needs the full method list rather than just `admin`'s state.
pub fn dispatch(admin: &AdminService, method: &str, params: &[serde_json::Value]) -> Result<serde_json::Value, RpcError> {
    use serde_json::json;

    match method {
        "banpubkey" => {
            let pk = PublicKey::from_hex(param_str(params, 0)?)
                .map_err(|e| RpcError::InvalidParams(e.to_string()))?;
            admin.ban_pubkey(pk);
            Ok(json!(null))
        }
        "allowpubkey" => {
            let pk = PublicKey::from_hex(param_str(params, 0)?)
                .map_err(|e| RpcError::InvalidParams(e.to_string()))?;
            admin.allow_pubkey(pk);
            Ok(json!(null))
        }
        "listbannedpubkeys" => Ok(json!(admin.list_banned_pubkeys())),
        "listallowedpubkeys" => Ok(json!(admin.list_allowed_pubkeys())),
        "banevent" => {
            let id = EventId::from_hex(param_str(params, 0)?)
                .map_err(|e| RpcError::InvalidParams(e.to_string()))?;
            admin.ban_event(id);
            Ok(json!(null))
        }
        "allowevent" => {
            let id = EventId::from_hex(param_str(params, 0)?)
                .map_err(|e| RpcError::InvalidParams(e.to_string()))?;
            admin.allow_event(id);
            Ok(json!(null))
        }
        "listbannedevents" => Ok(json!(admin.list_banned_events())),
        "allowkind" => {
            admin.allow_kind(param_u16(params, 0)?);
            Ok(json!(null))
        }
        "disallowkind" => {
            admin.disallow_kind(param_u16(params, 0)?);
            Ok(json!(null))
        }
        "listallowedkinds" => Ok(json!(admin.list_allowed_kinds())),
        "blockip" => {
            let ip: IpAddr = param_str(params, 0)?
                .parse()
                .map_err(|_| RpcError::InvalidParams("invalid ip address".to_string()))?;
            admin.block_ip(ip);
            Ok(json!(null))
        }
        "unblockip" => {
            let ip: IpAddr = param_str(params, 0)?
                .parse()
                .map_err(|_| RpcError::InvalidParams("invalid ip address".to_string()))?;
            admin.unblock_ip(ip);
            Ok(json!(null))
        }
        "listblockedips" => Ok(json!(admin.list_blocked_ips())),
        "changerelayname" => {
            admin.set_name(param_str(params, 0)?.to_string());
            Ok(json!(null))
        }
        "changerelaydescription" => {
            admin.set_description(param_str(params, 0)?.to_string());
            Ok(json!(null))
        }
        "changerelayicon" => {
            admin.set_icon(param_str(params, 0)?.to_string());
            Ok(json!(null))
        }
        other => Err(RpcError::UnknownMethod(other.to_string())),
    }
}

/// Every method name §4.8 recognizes, including `supportedmethods` itself.
pub const SUPPORTED_METHODS: &[&str] = &[
    "supportedmethods",
    "banpubkey",
    "allowpubkey",
    "listbannedpubkeys",
    "listallowedpubkeys",
    "banevent",
    "allowevent",
    "listbannedevents",
    "allowkind",
    "disallowkind",
    "listallowedkinds",
    "blockip",
    "unblockip",
    "listblockedips",
    "changerelayname",
    "changerelaydescription",
    "changerelayicon",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::tests_support::signed;

    fn pubkey() -> PublicKey {
        signed(1, "x", vec![], 1).pubkey
    }

    #[test]
    fn ban_then_allow_clears_the_ban() {
        let admin = AdminService::new();
        let pk = pubkey();
        admin.ban_pubkey(pk);
        assert!(admin.is_pubkey_banned(&pk));
        admin.allow_pubkey(pk);
        assert!(!admin.is_pubkey_banned(&pk));
    }

    #[test]
    fn kind_allow_list_round_trips() {
        let admin = AdminService::new();
        admin.allow_kind(30_000);
        admin.allow_kind(1);
        assert_eq!(admin.list_allowed_kinds(), vec![1, 30_000]);
        admin.disallow_kind(1);
        assert_eq!(admin.list_allowed_kinds(), vec![30_000]);
    }

    #[test]
    fn ip_blocking() {
        let admin = AdminService::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(!admin.is_ip_blocked(&ip));
        admin.block_ip(ip);
        assert!(admin.is_ip_blocked(&ip));
        admin.unblock_ip(ip);
        assert!(!admin.is_ip_blocked(&ip));
    }

    #[test]
    fn rpc_dispatch_bans_and_lists_a_pubkey() {
        let admin = AdminService::new();
        let pk = pubkey();
        dispatch(&admin, "banpubkey", &[serde_json::json!(pk.to_hex())]).unwrap();
        let listed = dispatch(&admin, "listbannedpubkeys", &[]).unwrap();
        assert_eq!(listed, serde_json::json!([pk.to_hex()]));
    }

    #[test]
    fn rpc_dispatch_rejects_unknown_method() {
        let admin = AdminService::new();
        let err = dispatch(&admin, "doesnotexist", &[]).unwrap_err();
        assert!(matches!(err, RpcError::UnknownMethod(_)));
    }
}
