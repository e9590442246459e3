//! The event validation pipeline and NIP-module registry (§4.2).
//!
//! A policy is a pure function `(context) -> Accept | Reject(reason) | Shadow`. The
//! registry's combined policy is the conjunction of every module's policies that handle
//! the event's kind, short-circuiting on the first non-`Accept` outcome (§9).

pub mod builtin;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{Event, Filter, PublicKey};

/// Outcome of evaluating one policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyResult {
    Accept,
    Reject(String),
    /// The server returns `OK true` with an empty reason and silently drops the event —
    /// used for auth-kind events, which must never be broadcast or stored.
    Shadow,
}

impl PolicyResult {
    #[inline]
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Everything a write policy needs to evaluate one `EVENT` submission.
pub struct WriteContext<'a> {
    pub event: &'a Event,
    pub now: u64,
    pub remote_addr: Option<SocketAddr>,
    pub authenticated_pubkey: Option<PublicKey>,
}

/// A policy gating event submission.
#[async_trait]
pub trait WritePolicy: Send + Sync {
    async fn admit_event(&self, ctx: &WriteContext<'_>) -> PolicyResult;
}

/// A policy gating subscription/query admission (e.g. administrative IP blocks).
#[async_trait]
pub trait QueryPolicy: Send + Sync {
    async fn admit_query(&self, filters: &[Filter], remote_addr: Option<SocketAddr>) -> PolicyResult;
}

/// Outcome of a pre-store hook (§4.2): hooks run in registration order; the first
/// `Replace`/`Reject` short-circuits the remaining hooks and the store call itself.
#[derive(Debug, Clone)]
pub enum PreStoreOutcome {
    Store,
    /// Replace: before storing, delete any events matching `delete_filter`.
    Replace(Filter),
    Reject(String),
}

/// Runs before storage, with the power to veto or rewrite the store operation.
#[async_trait]
pub trait PreStoreHook: Send + Sync {
    async fn before_store(&self, event: &Event) -> PreStoreOutcome;
}

/// Runs unconditionally after a successful store.
#[async_trait]
pub trait PostStoreHook: Send + Sync {
    async fn after_store(&self, event: &Event);
}

/// A composable bundle of policies, hooks, and capability declarations associated with
/// one or more protocol spec identifiers (§9 "Module registry").
pub struct NipModule {
    pub id: &'static str,
    /// Numeric NIPs this module realizes, advertised in the information document.
    pub nips: Vec<u16>,
    /// Kinds this module applies to; empty means "all kinds".
    pub kinds: HashSet<u16>,
    pub write_policies: Vec<Arc<dyn WritePolicy>>,
    pub query_policies: Vec<Arc<dyn QueryPolicy>>,
    pub pre_store_hook: Option<Arc<dyn PreStoreHook>>,
    pub post_store_hook: Option<Arc<dyn PostStoreHook>>,
    /// Fragment merged into the information document's capability advertisement.
    pub capabilities: Value,
}

impl NipModule {
    pub fn new(id: &'static str, nips: Vec<u16>) -> Self {
        Self {
            id,
            nips,
            kinds: HashSet::new(),
            write_policies: Vec::new(),
            query_policies: Vec::new(),
            pre_store_hook: None,
            post_store_hook: None,
            capabilities: Value::Null,
        }
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_write_policy(mut self, policy: Arc<dyn WritePolicy>) -> Self {
        self.write_policies.push(policy);
        self
    }

    pub fn with_query_policy(mut self, policy: Arc<dyn QueryPolicy>) -> Self {
        self.query_policies.push(policy);
        self
    }

    pub fn with_pre_store_hook(mut self, hook: Arc<dyn PreStoreHook>) -> Self {
        self.pre_store_hook = Some(hook);
        self
    }

    pub fn with_post_store_hook(mut self, hook: Arc<dyn PostStoreHook>) -> Self {
        self.post_store_hook = Some(hook);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn handles(&self, kind: u16) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// The ordered set of active modules, plus the fold that composes their policies.
#[derive(Default)]
pub struct Registry {
    modules: Vec<NipModule>,
}

impl Registry {
    pub fn new() -> Self {
        Self { modules: Vec::new() }
    }

    pub fn register(&mut self, module: NipModule) -> &mut Self {
        self.modules.push(module);
        self
    }

    /// Conjunction of every applicable module's write policies, short-circuiting on the
    /// first non-`Accept` outcome.
    pub async fn admit_event(&self, ctx: &WriteContext<'_>) -> PolicyResult {
        for module in &self.modules {
            if !module.handles(ctx.event.kind.as_u16()) {
                continue;
            }
            for policy in &module.write_policies {
                match policy.admit_event(ctx).await {
                    PolicyResult::Accept => {}
                    other => return other,
                }
            }
        }
        PolicyResult::Accept
    }

    pub async fn admit_query(
        &self,
        filters: &[Filter],
        remote_addr: Option<SocketAddr>,
    ) -> PolicyResult {
        for module in &self.modules {
            for policy in &module.query_policies {
                match policy.admit_query(filters, remote_addr).await {
                    PolicyResult::Accept => {}
                    other => return other,
                }
            }
        }
        PolicyResult::Accept
    }

    /// Run pre-store hooks in registration order; the first non-`Store` short-circuits.
    pub async fn before_store(&self, event: &Event) -> PreStoreOutcome {
        for module in &self.modules {
            if !module.handles(event.kind.as_u16()) {
                continue;
            }
            if let Some(hook) = &module.pre_store_hook {
                match hook.before_store(event).await {
                    PreStoreOutcome::Store => {}
                    other => return other,
                }
            }
        }
        PreStoreOutcome::Store
    }

    /// Run post-store hooks unconditionally, in registration order.
    pub async fn after_store(&self, event: &Event) {
        for module in &self.modules {
            if !module.handles(event.kind.as_u16()) {
                continue;
            }
            if let Some(hook) = &module.post_store_hook {
                hook.after_store(event).await;
            }
        }
    }

    /// Union of numeric NIPs advertised by active modules.
    pub fn supported_nips(&self) -> Vec<u16> {
        let mut nips: Vec<u16> = self
            .modules
            .iter()
            .flat_map(|m| m.nips.iter().copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        nips.sort_unstable();
        nips
    }

    /// Merge every module's capability fragment into one object for the info document.
    pub fn merged_capabilities(&self) -> Value {
        let mut merged = serde_json::Map::new();
        for module in &self.modules {
            if let Value::Object(fragment) = &module.capabilities {
                for (k, v) in fragment {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        Value::Object(merged)
    }
}
