//! HTTP + WebSocket front door (§6): one port serving the info document, the management
//! RPC, and the WebSocket upgrade. Grounded on `nostr-relay-builder`'s `examples/hyper.rs`,
//! which derives the `Sec-WebSocket-Accept` header by hand and wraps the hyper-upgraded
//! IO directly in a `tokio-tungstenite` stream rather than redoing the handshake.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, UPGRADE};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::admin;
use crate::connection::ConnectionContext;
use crate::handler::{handle_client_message, NegentropySessions};
use crate::info::{Limitation, RelayInformation};
use crate::model::ClientMessage;
use crate::relay::Relay;
use crate::subscription::SubscriptionTable;

const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derive the `Sec-WebSocket-Accept` response value from the client's handshake key.
fn derive_accept_key(request_key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(request_key);
    hasher.update(WS_GUID);
    BASE64.encode(hasher.finalize())
}

fn is_websocket_upgrade(req: &Request<Incoming>) -> bool {
    let is_upgrade = req
        .headers()
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_lowercase().contains("upgrade"))
        .unwrap_or(false);
    let is_websocket = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    is_upgrade && is_websocket
}

fn cors_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("access-control-allow-origin", "*")
        .header("access-control-allow-methods", "GET, POST, OPTIONS")
        .header("access-control-allow-headers", "Accept, Content-Type, Authorization")
        .body(Full::new(Bytes::new()))
        .expect("static response is always valid")
}

async fn handle_info(relay: &Relay) -> Response<Full<Bytes>> {
    let meta = relay.admin.meta();
    let limitation = Limitation {
        max_message_length: Some(relay.config.bounds.max_message_length),
        max_subscriptions: Some(relay.config.bounds.max_subscriptions),
        max_event_tags: Some(relay.config.bounds.max_event_tags),
        max_content_length: Some(relay.config.bounds.max_content_length),
        auth_required: Some(relay.config.require_auth),
        payment_required: Some(false),
        created_at_lower_limit: None,
        created_at_upper_limit: relay.config.bounds.max_future_secs,
        min_pow_difficulty: relay.config.min_pow,
    };
    let info = RelayInformation::build(
        &relay.config.registry,
        meta.name.or_else(|| relay.config.name.clone()),
        meta.description.or_else(|| relay.config.description.clone()),
        meta.icon.or_else(|| relay.config.icon.clone()),
        relay.config.admin_pubkey,
        limitation,
    );
    let body = info.to_json().to_string();
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/nostr+json")
        .header("access-control-allow-origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("info document response is always valid")
}

async fn handle_management_rpc(
    relay: &Relay,
    req_url: &str,
    auth_header: Option<&str>,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let unauthorized = || {
        Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(Full::new(Bytes::from(r#"{"error":"unauthorized"}"#)))
            .expect("static response is always valid")
    };

    let Some(encoded) = auth_header.and_then(|h| h.strip_prefix("Nostr ")) else {
        return unauthorized();
    };
    let Ok(decoded) = BASE64.decode(encoded) else {
        return unauthorized();
    };
    let Ok(event) = serde_json::from_slice::<crate::model::Event>(&decoded) else {
        return unauthorized();
    };
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    if crate::auth::verify_http_auth(&event, "POST", req_url, Some(&body), 60, now).is_err() {
        return unauthorized();
    }

    let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Full::new(Bytes::from(r#"{"error":"invalid json body"}"#)))
            .expect("static response is always valid");
    };
    let method = parsed.get("method").and_then(serde_json::Value::as_str).unwrap_or("");
    let params: Vec<serde_json::Value> = parsed
        .get("params")
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();

    let result = if method == "supportedmethods" {
        Ok(serde_json::json!(admin::SUPPORTED_METHODS))
    } else {
        admin::dispatch(&relay.admin, method, &params).map_err(|e| e.to_string())
    };

    let payload = match result {
        Ok(value) => serde_json::json!({ "result": value }),
        Err(message) => serde_json::json!({ "error": message }),
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/nostr+json+rpc")
        .header("access-control-allow-origin", "*")
        .body(Full::new(Bytes::from(payload.to_string())))
        .expect("rpc response is always valid")
}

/// Drive one upgraded WebSocket connection to completion: decode frames, dispatch them,
/// and write replies back, until the socket closes.
async fn run_connection(
    relay: Arc<Relay>,
    ws: WebSocketStream<TokioIo<hyper::upgrade::Upgraded>>,
    connection_id: u64,
    remote_addr: SocketAddr,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut conn = ConnectionContext::new(
        connection_id,
        Some(remote_addr),
        relay.config.rate_limit.max_events,
        relay.config.rate_limit.window,
    );
    let mut subs = SubscriptionTable::new();
    let mut neg = NegentropySessions::new();
    let (tx, mut rx) = mpsc::channel(256);
    let mut new_event = relay.subscribe();

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let Some(frame) = frame else { break };
                let Ok(frame) = frame else { break };
                match frame {
                    WsMessage::Text(text) => {
                        match ClientMessage::from_json(&text) {
                            Ok(msg) => {
                                if let Err(e) = handle_client_message(&relay, &mut conn, &mut subs, &mut neg, msg, &tx).await {
                                    // Only a broken outgoing channel or a wire-level protocol
                                    // fault means the peer/connection is unrecoverable; a
                                    // routine store or codec error is just reported back.
                                    match e {
                                        crate::error::Error::ChannelClosed | crate::error::Error::WebSocket(_) => break,
                                        other => {
                                            let _ = tx.send(crate::model::RelayMessage::notice(other.to_string())).await;
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(crate::model::RelayMessage::notice(e.to_string())).await;
                            }
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            Some(msg) = rx.recv() => {
                if ws_tx.send(WsMessage::Text(msg.as_json())).await.is_err() {
                    break;
                }
            }
            Ok(event) = new_event.recv() => {
                for sub_id in subs.matching(&event) {
                    let relay_msg = crate::model::RelayMessage::event(sub_id.to_string(), event.clone());
                    if ws_tx.send(WsMessage::Text(relay_msg.as_json())).await.is_err() {
                        return;
                    }
                }
            }
            else => break,
        }
    }
}

async fn route(
    relay: Arc<Relay>,
    remote_addr: SocketAddr,
    connection_id: u64,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if is_websocket_upgrade(&req) {
        let key = req.headers().get("sec-websocket-key").cloned();
        let Some(key) = key else {
            return Ok(cors_response(StatusCode::BAD_REQUEST));
        };
        let accept = derive_accept_key(key.as_bytes());

        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    let io = TokioIo::new(upgraded);
                    let ws = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
                    run_connection(relay, ws, connection_id, remote_addr).await;
                }
                Err(e) => tracing::error!(error = %e, "websocket upgrade failed"),
            }
        });

        return Ok(Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(CONNECTION, "upgrade")
            .header(UPGRADE, "websocket")
            .header(SEC_WEBSOCKET_ACCEPT, accept)
            .body(Full::new(Bytes::new()))
            .expect("switching-protocols response is always valid"));
    }

    match *req.method() {
        Method::OPTIONS => Ok(cors_response(StatusCode::NO_CONTENT)),
        Method::GET => Ok(handle_info(&relay).await),
        Method::POST => {
            let url = req.uri().to_string();
            let auth_header = req
                .headers()
                .get(hyper::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = req
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            Ok(handle_management_rpc(&relay, &url, auth_header.as_deref(), body).await)
        }
        _ => Ok(cors_response(StatusCode::NOT_FOUND)),
    }
}

/// A handle to a running relay: its bound address and a shutdown switch.
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl ServerHandle {
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Bind and serve `relay` until [`ServerHandle::stop`] is called.
pub async fn serve(relay: Arc<Relay>) -> Result<ServerHandle, crate::error::Error> {
    let bind_addr = SocketAddr::new(relay.config.addr, relay.config.port.unwrap_or(0));
    let listener = TcpListener::bind(bind_addr).await?;
    let local_addr = listener.local_addr()?;
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        let mut connection_id: u64 = 0;
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let Ok((stream, remote_addr)) = accepted else { continue };
                    connection_id += 1;
                    let id = connection_id;
                    let relay = relay.clone();
                    let io = TokioIo::new(stream);
                    tokio::spawn(async move {
                        let service = service_fn(move |req| route(relay.clone(), remote_addr, id, req));
                        if let Err(e) = hyper::server::conn::http1::Builder::new()
                            .serve_connection(io, service)
                            .with_upgrades()
                            .await
                        {
                            tracing::debug!(error = %e, "connection ended with an error");
                        }
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    Ok(ServerHandle {
        local_addr,
        shutdown: shutdown_tx,
    })
}
