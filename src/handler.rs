//! The message handler (§4.1-§4.9): dispatches one decoded client frame at a time,
//! wiring together the policy registry, event store, subscription table and connection
//! context. Grounded on `nostr-relay-builder`'s `InnerLocalRelay::handle_client_msg`.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::auth::{generate_challenge, verify_auth_event};
use crate::connection::{AuthState, ConnectionContext};
use crate::model::kind::well_known;
use crate::model::{ClientMessage, Event, Filter, RelayMessage};
use crate::negentropy::IdListFrame;
use crate::policy::{PolicyResult, PreStoreOutcome, WriteContext};
use crate::relay::Relay;
use crate::subscription::SubscriptionTable;

/// Per-connection negentropy state: one open filter per subscription id.
pub type NegentropySessions = HashMap<String, Filter>;

async fn send(tx: &mpsc::Sender<RelayMessage>, msg: RelayMessage) -> Result<(), crate::error::Error> {
    tx.send(msg).await.map_err(|_| crate::error::Error::ChannelClosed)
}

/// Handle one decoded client frame, writing any responses to `tx`.
pub async fn handle_client_message(
    relay: &Relay,
    conn: &mut ConnectionContext,
    subs: &mut SubscriptionTable,
    neg: &mut NegentropySessions,
    msg: ClientMessage,
    tx: &mpsc::Sender<RelayMessage>,
) -> Result<(), crate::error::Error> {
    match msg {
        ClientMessage::Event(event) => handle_event(relay, conn, *event, tx).await,
        ClientMessage::Req {
            subscription_id,
            filters,
        } => handle_req(relay, conn, subs, subscription_id, filters, tx).await,
        ClientMessage::Count {
            subscription_id,
            filters,
        } => {
            let count = relay.config.store.count(&filters).await?;
            send(tx, RelayMessage::Count { subscription_id, count }).await
        }
        ClientMessage::Close(subscription_id) => {
            subs.remove(&subscription_id);
            Ok(())
        }
        ClientMessage::Auth(event) => handle_auth(relay, conn, *event, tx).await,
        ClientMessage::NegOpen {
            subscription_id,
            filter,
            initial_message,
        } => handle_neg_open(relay, neg, subscription_id, *filter, initial_message, tx).await,
        ClientMessage::NegMsg {
            subscription_id,
            message,
        } => handle_neg_msg(neg, subscription_id, message, tx).await,
        ClientMessage::NegClose { subscription_id } => {
            neg.remove(&subscription_id);
            Ok(())
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn handle_event(
    relay: &Relay,
    conn: &mut ConnectionContext,
    event: Event,
    tx: &mpsc::Sender<RelayMessage>,
) -> Result<(), crate::error::Error> {
    let event_id = event.id.to_hex();

    if !conn.rate_limiter.try_acquire() {
        return send(
            tx,
            RelayMessage::ok(event_id, false, "rate-limited: slow down"),
        )
        .await;
    }

    if let crate::builder::RelayMode::PublicKey(owner) = relay.config.mode {
        let tagged = event.tag_values("p").any(|p| p == owner.to_hex());
        if event.pubkey != owner && !tagged {
            return send(
                tx,
                RelayMessage::ok(event_id, false, "blocked: event not related to the owner of this relay"),
            )
            .await;
        }
    }

    if relay.config.require_auth && conn.authenticated_pubkey().is_none() {
        let challenge = generate_challenge();
        conn.auth = AuthState::Challenged(challenge.clone());
        send(tx, RelayMessage::Auth { challenge }).await?;
        return send(tx, RelayMessage::ok(event_id, false, "auth-required: you must auth")).await;
    }

    let now = now_secs();
    let ctx = WriteContext {
        event: &event,
        now,
        remote_addr: conn.remote_addr,
        authenticated_pubkey: conn.authenticated_pubkey(),
    };
    match relay.config.registry.admit_event(&ctx).await {
        PolicyResult::Accept => {}
        PolicyResult::Shadow => {
            return send(tx, RelayMessage::ok(event_id, true, "")).await;
        }
        PolicyResult::Reject(reason) => {
            return send(tx, RelayMessage::ok(event_id, false, reason)).await;
        }
    }

    if event.kind.is_ephemeral() {
        let _ = relay.broadcast(event.clone());
        return send(tx, RelayMessage::ok(event_id, true, "")).await;
    }

    match relay.config.registry.before_store(&event).await {
        PreStoreOutcome::Store => {}
        PreStoreOutcome::Replace(delete_filter) => {
            let to_delete = relay.config.store.query(&[delete_filter]).await?;
            let ids: Vec<_> = to_delete.iter().map(|e| e.id).collect();
            relay.config.store.delete_by_ids(&event.pubkey, &ids).await?;
        }
        PreStoreOutcome::Reject(reason) => {
            return send(tx, RelayMessage::ok(event_id, false, reason)).await;
        }
    }

    if event.kind.is_deletion() {
        let ids: Vec<_> = event
            .tag_values("e")
            .filter_map(|hex| crate::model::EventId::from_hex(hex).ok())
            .collect();
        relay.config.store.delete_by_ids(&event.pubkey, &ids).await?;
    }

    let outcome = relay.config.store.save(&event).await?;
    if !outcome.stored {
        let reason = outcome.reason.unwrap_or_else(|| "blocked: rejected".to_string());
        return send(tx, RelayMessage::ok(event_id, false, reason)).await;
    }

    // Store first, then sweep: the threshold this sets would otherwise reject (or erase)
    // the vanish event's own save, since its created_at equals the threshold.
    if event.kind.is_vanish() {
        relay.config.store.vanish(&event.pubkey, event.created_at, event.id).await?;
    }

    relay.config.registry.after_store(&event).await;
    let _ = relay.broadcast(event.clone());

    let message = outcome.reason.unwrap_or_default();
    send(tx, RelayMessage::ok(event_id, true, message)).await
}

async fn handle_req(
    relay: &Relay,
    conn: &ConnectionContext,
    subs: &mut SubscriptionTable,
    subscription_id: String,
    filters: Vec<Filter>,
    tx: &mpsc::Sender<RelayMessage>,
) -> Result<(), crate::error::Error> {
    if subs.len() >= relay.config.bounds.max_subscriptions && !subs.contains(&subscription_id) {
        return send(
            tx,
            RelayMessage::Closed {
                subscription_id,
                message: "rate-limited: too many subscriptions".to_string(),
            },
        )
        .await;
    }

    if relay.config.require_auth && conn.authenticated_pubkey().is_none() {
        return send(
            tx,
            RelayMessage::Closed {
                subscription_id,
                message: "auth-required: you must auth".to_string(),
            },
        )
        .await;
    }

    if let PolicyResult::Reject(reason) = relay
        .config
        .registry
        .admit_query(&filters, conn.remote_addr)
        .await
    {
        return send(
            tx,
            RelayMessage::Closed {
                subscription_id,
                message: reason,
            },
        )
        .await;
    }

    subs.insert(subscription_id.clone(), filters.clone());

    let events = relay.config.store.query(&filters).await?;
    for event in events {
        send(
            tx,
            RelayMessage::event(subscription_id.clone(), event),
        )
        .await?;
    }
    send(tx, RelayMessage::Eose(subscription_id)).await
}

async fn handle_auth(
    relay: &Relay,
    conn: &mut ConnectionContext,
    event: Event,
    tx: &mpsc::Sender<RelayMessage>,
) -> Result<(), crate::error::Error> {
    let event_id = event.id.to_hex();
    let expected = match &conn.auth {
        AuthState::Challenged(challenge) => Some(challenge.clone()),
        _ => None,
    };
    match verify_auth_event(
        &event,
        expected.as_deref(),
        &relay.config.relay_url,
        now_secs(),
        relay.config.auth_max_age_secs,
    ) {
        Ok(pubkey) => {
            conn.auth = AuthState::Authenticated(pubkey);
            send(tx, RelayMessage::ok(event_id, true, "")).await
        }
        Err(e) => send(tx, RelayMessage::ok(event_id, false, e.to_string())).await,
    }
}

async fn handle_neg_open(
    relay: &Relay,
    neg: &mut NegentropySessions,
    subscription_id: String,
    filter: Filter,
    initial_message: String,
    tx: &mpsc::Sender<RelayMessage>,
) -> Result<(), crate::error::Error> {
    if IdListFrame::from_hex(&initial_message).is_err() {
        return send(
            tx,
            RelayMessage::NegErr {
                subscription_id,
                message: "error: could not decode negentropy message".to_string(),
            },
        )
        .await;
    }

    let items = relay.config.store.negentropy_items(&filter).await?;
    let ids = items.into_iter().map(|(id, _)| id).collect();
    neg.insert(subscription_id.clone(), filter);

    send(
        tx,
        RelayMessage::NegMsg {
            subscription_id,
            message: IdListFrame::full(ids).to_hex(),
        },
    )
    .await
}

async fn handle_neg_msg(
    neg: &mut NegentropySessions,
    subscription_id: String,
    message: String,
    tx: &mpsc::Sender<RelayMessage>,
) -> Result<(), crate::error::Error> {
    if !neg.contains_key(&subscription_id) {
        return send(
            tx,
            RelayMessage::NegErr {
                subscription_id,
                message: "error: subscription not found".to_string(),
            },
        )
        .await;
    }
    if IdListFrame::from_hex(&message).is_err() {
        return send(
            tx,
            RelayMessage::NegErr {
                subscription_id,
                message: "error: could not decode negentropy message".to_string(),
            },
        )
        .await;
    }
    send(
        tx,
        RelayMessage::NegMsg {
            subscription_id,
            message: IdListFrame::full(Vec::new()).to_hex(),
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RelayBuilder;
    use crate::model::event::tests_support::signed;
    use std::sync::Arc;

    fn test_relay() -> Relay {
        let admin = Arc::new(crate::admin::AdminService::new());
        let config = RelayBuilder::new().build(admin.clone());
        Relay::new(config, admin)
    }

    #[tokio::test]
    async fn publishing_a_valid_event_is_accepted_and_queryable() {
        let relay = test_relay();
        let mut conn = ConnectionContext::new(1, None, 1000, std::time::Duration::from_secs(60));
        let mut subs = SubscriptionTable::new();
        let mut neg = NegentropySessions::new();
        let (tx, mut rx) = mpsc::channel(8);

        let event = signed(1, "hello", vec![], now_secs());
        handle_client_message(
            &relay,
            &mut conn,
            &mut subs,
            &mut neg,
            ClientMessage::Event(Box::new(event.clone())),
            &tx,
        )
        .await
        .unwrap();

        let reply = rx.recv().await.unwrap();
        match reply {
            RelayMessage::Ok { status, .. } => assert!(status),
            other => panic!("unexpected reply: {other:?}"),
        }

        handle_client_message(
            &relay,
            &mut conn,
            &mut subs,
            &mut neg,
            ClientMessage::Req {
                subscription_id: "s1".to_string(),
                filters: vec![Filter::new()],
            },
            &tx,
        )
        .await
        .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, RelayMessage::Event { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, RelayMessage::Eose(_)));
    }

    #[tokio::test]
    async fn rate_limited_connection_is_rejected() {
        let relay = test_relay();
        let mut conn = ConnectionContext::new(1, None, 1, std::time::Duration::from_secs(60));
        let mut subs = SubscriptionTable::new();
        let mut neg = NegentropySessions::new();
        let (tx, mut rx) = mpsc::channel(8);

        for _ in 0..2 {
            let event = signed(1, "x", vec![], now_secs());
            handle_client_message(
                &relay,
                &mut conn,
                &mut subs,
                &mut neg,
                ClientMessage::Event(Box::new(event)),
                &tx,
            )
            .await
            .unwrap();
        }
        let _first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match second {
            RelayMessage::Ok { status, message, .. } => {
                assert!(!status);
                assert!(message.starts_with("rate-limited"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
