//! End-to-end scenarios driving a real in-process relay over WebSocket and HTTP,
//! matching the concrete scenarios enumerated alongside this protocol's invariants:
//! publish/read-back, replaceable and parameterized-replaceable events, deletion,
//! duplicate handling, rate limiting, search, negentropy, and management auth.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{keypair, now_secs, pubkey_hex, signed};
use futures_util::{SinkExt, StreamExt};
use nostr_relay_engine::admin::AdminService;
use nostr_relay_engine::builder::RateLimit;
use nostr_relay_engine::model::Tag;
use nostr_relay_engine::negentropy::IdListFrame;
use nostr_relay_engine::{serve, Relay, RelayBuilder};
use sha2::Digest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

async fn start_relay(builder: RelayBuilder) -> (Arc<Relay>, nostr_relay_engine::ServerHandle, String) {
    let admin = Arc::new(AdminService::new());
    let config = builder.build(admin.clone());
    let relay = Arc::new(Relay::new(config, admin));
    let handle = serve(relay.clone()).await.expect("relay binds its listener");
    let ws_url = format!("ws://{}/", handle.local_addr);
    (relay, handle, ws_url)
}

async fn connect(url: &str) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.expect("client connects");
    ws
}

async fn send_frame(
    ws: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
    frame: serde_json::Value,
) {
    ws.send(Message::Text(frame.to_string())).await.expect("frame sends");
}

async fn recv_json(
    ws: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
) -> serde_json::Value {
    loop {
        match ws.next().await.expect("stream ends unexpectedly").expect("frame decodes") {
            Message::Text(text) => return serde_json::from_str(&text).expect("relay sends valid json"),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn publish_and_read_back_a_text_note() {
    let (_relay, _handle, url) = start_relay(RelayBuilder::new()).await;
    let author = keypair();
    let event = signed(&author, 1, "hello", vec![], now_secs());

    let mut publisher = connect(&url).await;
    send_frame(&mut publisher, serde_json::json!(["EVENT", event])).await;
    let ok = recv_json(&mut publisher).await;
    assert_eq!(ok[0], "OK");
    assert_eq!(ok[2], true);

    let mut reader = connect(&url).await;
    send_frame(
        &mut reader,
        serde_json::json!(["REQ", "s1", {"kinds": [1], "authors": [pubkey_hex(&author)]}]),
    )
    .await;
    let evt = recv_json(&mut reader).await;
    assert_eq!(evt[0], "EVENT");
    assert_eq!(evt[1], "s1");
    let eose = recv_json(&mut reader).await;
    assert_eq!(eose[0], "EOSE");
}

#[tokio::test]
async fn replaceable_profile_keeps_only_the_latest() {
    let (_relay, _handle, url) = start_relay(RelayBuilder::new()).await;
    let author = keypair();
    let mut ws = connect(&url).await;

    let v1 = signed(&author, 0, "v1", vec![], 100);
    send_frame(&mut ws, serde_json::json!(["EVENT", v1])).await;
    let _ = recv_json(&mut ws).await;

    let v2 = signed(&author, 0, "v2", vec![], 200);
    send_frame(&mut ws, serde_json::json!(["EVENT", v2])).await;
    let _ = recv_json(&mut ws).await;

    send_frame(
        &mut ws,
        serde_json::json!(["REQ", "s1", {"kinds": [0], "authors": [pubkey_hex(&author)]}]),
    )
    .await;
    let evt = recv_json(&mut ws).await;
    assert_eq!(evt[2]["content"], "v2");
    let eose = recv_json(&mut ws).await;
    assert_eq!(eose[0], "EOSE");
}

#[tokio::test]
async fn parameterized_replaceable_list_keeps_only_the_latest_per_identifier() {
    let (_relay, _handle, url) = start_relay(RelayBuilder::new()).await;
    let author = keypair();
    let mut ws = connect(&url).await;

    let first = signed(&author, 30_003, "old", vec![Tag::identifier("a")], 100);
    send_frame(&mut ws, serde_json::json!(["EVENT", first])).await;
    let _ = recv_json(&mut ws).await;

    let second = signed(&author, 30_003, "new", vec![Tag::identifier("a")], 200);
    send_frame(&mut ws, serde_json::json!(["EVENT", second])).await;
    let _ = recv_json(&mut ws).await;

    send_frame(
        &mut ws,
        serde_json::json!(["REQ", "s1", {"kinds": [30_003], "#d": ["a"]}]),
    )
    .await;
    let evt = recv_json(&mut ws).await;
    assert_eq!(evt[2]["content"], "new");
    let eose = recv_json(&mut ws).await;
    assert_eq!(eose[0], "EOSE");
}

#[tokio::test]
async fn deletion_removes_the_target_but_keeps_the_deletion_event() {
    let (_relay, _handle, url) = start_relay(RelayBuilder::new()).await;
    let author = keypair();
    let mut ws = connect(&url).await;

    let note = signed(&author, 1, "delete me", vec![], now_secs());
    let note_id = note.id.to_hex();
    send_frame(&mut ws, serde_json::json!(["EVENT", note])).await;
    let _ = recv_json(&mut ws).await;

    let deletion = signed(&author, 5, "", vec![Tag::event(note_id.clone())], now_secs());
    send_frame(&mut ws, serde_json::json!(["EVENT", deletion])).await;
    let ok = recv_json(&mut ws).await;
    assert_eq!(ok[2], true);

    send_frame(&mut ws, serde_json::json!(["REQ", "s1", {"ids": [note_id]}])).await;
    let eose = recv_json(&mut ws).await;
    assert_eq!(eose[0], "EOSE", "the deleted event must not be returned");
}

#[tokio::test]
async fn vanish_removes_earlier_events_but_the_vanish_event_itself_round_trips() {
    let (_relay, _handle, url) = start_relay(RelayBuilder::new()).await;
    let author = keypair();
    let mut ws = connect(&url).await;

    let now = now_secs();
    let old = signed(&author, 1, "before the vanish", vec![], now - 100);
    send_frame(&mut ws, serde_json::json!(["EVENT", old])).await;
    let _ = recv_json(&mut ws).await;

    let vanish = signed(&author, 62, "", vec![], now);
    let vanish_id = vanish.id.to_hex();
    send_frame(&mut ws, serde_json::json!(["EVENT", vanish])).await;
    let ok = recv_json(&mut ws).await;
    assert_eq!(ok[0], "OK");
    assert_eq!(ok[1], vanish_id);
    assert_eq!(ok[2], true, "the vanish event itself must be stored, not rejected by its own threshold");

    send_frame(
        &mut ws,
        serde_json::json!(["REQ", "s1", {"kinds": [1, 62], "authors": [pubkey_hex(&author)]}]),
    )
    .await;
    let mut seen = Vec::new();
    loop {
        let reply = recv_json(&mut ws).await;
        if reply[0] == "EOSE" {
            break;
        }
        seen.push(reply[2]["id"].as_str().unwrap().to_string());
    }
    assert_eq!(seen, vec![vanish_id], "the earlier event must be gone and the vanish event must remain");
}

#[tokio::test]
async fn duplicate_publication_is_idempotent() {
    let (_relay, _handle, url) = start_relay(RelayBuilder::new()).await;
    let author = keypair();
    let mut ws = connect(&url).await;

    let event = signed(&author, 1, "once", vec![], now_secs());
    send_frame(&mut ws, serde_json::json!(["EVENT", event.clone()])).await;
    let first = recv_json(&mut ws).await;
    assert_eq!(first[2], true);
    assert_eq!(first[3], "");

    send_frame(&mut ws, serde_json::json!(["EVENT", event])).await;
    let second = recv_json(&mut ws).await;
    assert_eq!(second[2], true);
    assert!(second[3].as_str().unwrap().starts_with("duplicate"));
}

#[tokio::test]
async fn rapid_submissions_are_rate_limited() {
    let (_relay, _handle, url) = start_relay(RelayBuilder::new().rate_limit(RateLimit {
        max_events: 3,
        window: Duration::from_millis(800),
    }))
    .await;
    let author = keypair();
    let mut ws = connect(&url).await;

    let mut saw_rate_limited = false;
    for i in 0..5u64 {
        let event = signed(&author, 1, &format!("msg {i}"), vec![], now_secs());
        send_frame(&mut ws, serde_json::json!(["EVENT", event])).await;
        let reply = recv_json(&mut ws).await;
        if reply[2] == false {
            assert!(reply[3].as_str().unwrap().starts_with("rate-limited"));
            saw_rate_limited = true;
        }
    }
    assert!(saw_rate_limited, "at least one of 5 rapid submissions must be rate-limited");
}

#[tokio::test]
async fn search_filter_matches_content_substring() {
    let (_relay, _handle, url) = start_relay(RelayBuilder::new()).await;
    let author = keypair();
    let mut ws = connect(&url).await;

    for content in ["Yaks are amazing", "unrelated", "yak milk"] {
        let event = signed(&author, 1, content, vec![], now_secs());
        send_frame(&mut ws, serde_json::json!(["EVENT", event])).await;
        let _ = recv_json(&mut ws).await;
    }

    send_frame(&mut ws, serde_json::json!(["REQ", "s1", {"search": "yak"}])).await;
    let mut matched = Vec::new();
    loop {
        let reply = recv_json(&mut ws).await;
        if reply[0] == "EOSE" {
            break;
        }
        matched.push(reply[2]["content"].as_str().unwrap().to_string());
    }
    assert_eq!(matched.len(), 2);
    assert!(matched.contains(&"Yaks are amazing".to_string()));
    assert!(matched.contains(&"yak milk".to_string()));
}

#[tokio::test]
async fn negentropy_handshake_replies_with_a_decodable_id_list_frame() {
    let (_relay, _handle, url) = start_relay(RelayBuilder::new()).await;
    let mut ws = connect(&url).await;

    let opening = IdListFrame::full(vec![]).to_hex();
    send_frame(&mut ws, serde_json::json!(["NEG-OPEN", "n1", {}, opening])).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply[0], "NEG-MSG");
    assert_eq!(reply[1], "n1");
    let frame = IdListFrame::from_hex(reply[2].as_str().unwrap()).expect("a valid IdList frame");
    assert!(frame.ids.is_empty());
}

/// A minimal raw-HTTP/1.1 POST, enough to drive the management RPC endpoint without
/// pulling in a full HTTP client dependency.
async fn post(addr: std::net::SocketAddr, auth_header: Option<&str>, body: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.expect("connects to the relay's http port");
    let mut request = format!(
        "POST / HTTP/1.1\r\nHost: {addr}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    if let Some(auth) = auth_header {
        request.push_str(&format!("Authorization: {auth}\r\n"));
    }
    request.push_str("\r\n");
    request.push_str(body);
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response).to_string();
    let status = text
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let body = text.split("\r\n\r\n").nth(1).unwrap_or("").to_string();
    (status, body)
}

#[tokio::test]
async fn management_rpc_requires_nip98_auth() {
    let (relay, handle, _url) = start_relay(RelayBuilder::new()).await;
    let body = r#"{"method":"listallowedkinds","params":[]}"#;

    let (status, _) = post(handle.local_addr, None, body).await;
    assert_eq!(status, 401);

    let operator = keypair();
    let digest = hex::encode(sha2::Sha256::digest(body.as_bytes()));
    let auth_event = signed(
        &operator,
        27235,
        "",
        vec![
            Tag::new(vec!["u".to_string(), "/".to_string()]).unwrap(),
            Tag::new(vec!["method".to_string(), "POST".to_string()]).unwrap(),
            Tag::new(vec!["payload".to_string(), digest]).unwrap(),
        ],
        now_secs(),
    );
    let encoded = base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        serde_json::to_string(&auth_event).unwrap(),
    );
    let header = format!("Nostr {encoded}");

    let (status, resp_body) = post(handle.local_addr, Some(&header), body).await;
    assert_eq!(status, 200);
    let parsed: serde_json::Value = serde_json::from_str(&resp_body).expect("rpc replies with json");
    assert!(parsed.get("result").is_some(), "expected a result, got {parsed}");

    drop(relay);
}
