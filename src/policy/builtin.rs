//! Built-in policies enumerated in §4.2.

use async_trait::async_trait;

use crate::admin::AdminService;
use crate::model::kind::well_known;

use super::{PolicyResult, WriteContext, WritePolicy};

/// Recompute the canonical hash and verify the Schnorr signature.
pub struct SignatureVerification;

#[async_trait]
impl WritePolicy for SignatureVerification {
    async fn admit_event(&self, ctx: &WriteContext<'_>) -> PolicyResult {
        if !ctx.event.verify_id() {
            return PolicyResult::Reject("invalid: id mismatch".to_string());
        }
        if !ctx.event.verify_signature() {
            return PolicyResult::Reject("invalid: bad signature".to_string());
        }
        PolicyResult::Accept
    }
}

/// Reject events whose `content` exceeds `max_len` bytes.
pub struct ContentLengthBound {
    pub max_len: usize,
}

#[async_trait]
impl WritePolicy for ContentLengthBound {
    async fn admit_event(&self, ctx: &WriteContext<'_>) -> PolicyResult {
        if ctx.event.content.len() > self.max_len {
            PolicyResult::Reject("invalid: content too long".to_string())
        } else {
            PolicyResult::Accept
        }
    }
}

/// Reject events carrying more than `max_tags` tags.
pub struct TagCountBound {
    pub max_tags: usize,
}

#[async_trait]
impl WritePolicy for TagCountBound {
    async fn admit_event(&self, ctx: &WriteContext<'_>) -> PolicyResult {
        if ctx.event.tags.len() > self.max_tags {
            PolicyResult::Reject("invalid: too many tags".to_string())
        } else {
            PolicyResult::Accept
        }
    }
}

/// Reject events timestamped too far in the future or past, per §4.2/§9 (apply the
/// strictest configured bound).
pub struct TimeBounds {
    pub max_future_secs: Option<u64>,
    pub max_past_secs: Option<u64>,
}

#[async_trait]
impl WritePolicy for TimeBounds {
    async fn admit_event(&self, ctx: &WriteContext<'_>) -> PolicyResult {
        if let Some(max_future) = self.max_future_secs {
            if ctx.event.created_at > ctx.now.saturating_add(max_future) {
                return PolicyResult::Reject("invalid: created_at too far in the future".to_string());
            }
        }
        if let Some(max_past) = self.max_past_secs {
            if ctx.event.created_at < ctx.now.saturating_sub(max_past) {
                return PolicyResult::Reject("invalid: created_at too far in the past".to_string());
            }
        }
        PolicyResult::Accept
    }
}

/// Shadow-drop NIP-42 auth-kind events: they must never be stored or broadcast.
pub struct AuthKindShadow;

#[async_trait]
impl WritePolicy for AuthKindShadow {
    async fn admit_event(&self, ctx: &WriteContext<'_>) -> PolicyResult {
        if ctx.event.kind.as_u16() == well_known::AUTHENTICATION {
            PolicyResult::Shadow
        } else {
            PolicyResult::Accept
        }
    }
}

/// NIP-70 protected events: the submitting connection must be authenticated as the
/// event's own pubkey (not merely authenticated as *someone*).
pub struct ProtectedEvents;

#[async_trait]
impl WritePolicy for ProtectedEvents {
    async fn admit_event(&self, ctx: &WriteContext<'_>) -> PolicyResult {
        if !ctx.event.is_protected() {
            return PolicyResult::Accept;
        }
        match ctx.authenticated_pubkey {
            Some(pk) if pk == ctx.event.pubkey => PolicyResult::Accept,
            _ => PolicyResult::Reject("auth-required: protected event".to_string()),
        }
    }
}

/// NIP-13 proof-of-work gate: require at least `min_difficulty` leading zero bits on the
/// event id.
pub struct ProofOfWork {
    pub min_difficulty: u8,
}

#[async_trait]
impl WritePolicy for ProofOfWork {
    async fn admit_event(&self, ctx: &WriteContext<'_>) -> PolicyResult {
        if ctx.event.id.leading_zero_bits() < self.min_difficulty as u32 {
            PolicyResult::Reject(format!(
                "pow: required a difficulty >= {}",
                self.min_difficulty
            ))
        } else {
            PolicyResult::Accept
        }
    }
}

/// Administrative deny list: banned pubkeys/events/ips, and optional kind allow-listing.
pub struct AdministrativeDeny {
    pub admin: std::sync::Arc<AdminService>,
}

#[async_trait]
impl WritePolicy for AdministrativeDeny {
    async fn admit_event(&self, ctx: &WriteContext<'_>) -> PolicyResult {
        if self.admin.is_pubkey_banned(&ctx.event.pubkey) {
            return PolicyResult::Reject("blocked: pubkey is banned".to_string());
        }
        if self.admin.is_event_banned(&ctx.event.id) {
            return PolicyResult::Reject("blocked: event is banned".to_string());
        }
        if let Some(addr) = ctx.remote_addr {
            if self.admin.is_ip_blocked(&addr.ip()) {
                return PolicyResult::Reject("blocked: ip is blocked".to_string());
            }
        }
        let allowed = self.admin.list_allowed_kinds();
        if !allowed.is_empty() && !allowed.contains(&ctx.event.kind.as_u16()) {
            return PolicyResult::Reject("restricted: kind not allowed".to_string());
        }
        PolicyResult::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::tests_support::signed;

    fn ctx(event: &crate::model::Event) -> WriteContext<'_> {
        WriteContext {
            event,
            now: event.created_at,
            remote_addr: None,
            authenticated_pubkey: None,
        }
    }

    #[tokio::test]
    async fn signature_policy_rejects_tampered_event() {
        let mut event = signed(1, "hi", vec![], 1);
        event.content = "tampered".to_string();
        let result = SignatureVerification.admit_event(&ctx(&event)).await;
        assert_eq!(result, PolicyResult::Reject("invalid: id mismatch".to_string()));
    }

    #[tokio::test]
    async fn auth_kind_is_shadowed() {
        let event = signed(well_known::AUTHENTICATION, "", vec![], 1);
        let result = AuthKindShadow.admit_event(&ctx(&event)).await;
        assert_eq!(result, PolicyResult::Shadow);
    }

    #[tokio::test]
    async fn protected_event_needs_matching_auth() {
        let event = signed(1, "x", vec![crate::model::Tag::new(vec!["-".into()]).unwrap()], 1);
        let result = ProtectedEvents.admit_event(&ctx(&event)).await;
        assert!(matches!(result, PolicyResult::Reject(_)));

        let mut authed = ctx(&event);
        authed.authenticated_pubkey = Some(event.pubkey);
        let result = ProtectedEvents.admit_event(&authed).await;
        assert_eq!(result, PolicyResult::Accept);
    }

    #[tokio::test]
    async fn time_bounds_reject_far_future() {
        let event = signed(1, "x", vec![], 10_000);
        let policy = TimeBounds {
            max_future_secs: Some(60),
            max_past_secs: None,
        };
        let mut context = ctx(&event);
        context.now = 100;
        let result = policy.admit_event(&context).await;
        assert!(matches!(result, PolicyResult::Reject(_)));
    }
}
