//! WebSocket transport against a loopback server
//!
//! The server speaks the feed's JSON protocol over plain ws:// on 127.0.0.1.

use std::str::FromStr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use catalyst_monitor::feed::{FeedError, FeedMessage, FeedTransport, WsFeedConfig, WsFeedTransport};

/// Accept one client, answer its auth frame with `auth_reply`, then forward
/// every frame the client sends to `seen` and send `script` frames in order.
async fn spawn_server(
    auth_reply: &'static str,
    script: Vec<&'static str>,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

        // Auth frame
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let _ = seen_tx.send(text);
        }
        ws.send(Message::Text(auth_reply.to_string())).await.unwrap();

        // Subscribe frame, then the scripted traffic
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let _ = seen_tx.send(text);
        }
        for frame in script {
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }

        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let _ = seen_tx.send(text);
            }
        }
    });

    (url, seen_rx)
}

async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
    let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for client frame")
        .expect("server closed");
    serde_json::from_str(&text).unwrap()
}

fn config(url: &str) -> WsFeedConfig {
    let mut config = WsFeedConfig::new(url).with_api_key("test-key");
    config.connect_timeout = Duration::from_secs(5);
    config
}

#[tokio::test]
async fn test_auth_subscribe_and_receive_ticks() {
    let (url, mut seen) = spawn_server(
        r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#,
        vec![
            r#"[{"ev":"status","status":"success","message":"subscribed to: T.AAPL"}]"#,
            r#"[{"ev":"T","sym":"AAPL","p":150.5,"t":1700000000000},{"ev":"T","sym":"MSFT","p":-1,"t":1700000000000}]"#,
            "not json",
        ],
    )
    .await;

    let mut transport = WsFeedTransport::new(config(&url));
    transport.connect().await.unwrap();
    assert!(transport.is_connected());

    let auth = recv_frame(&mut seen).await;
    assert_eq!(auth["action"], "auth");
    assert_eq!(auth["params"], "test-key");

    transport
        .subscribe(&["AAPL".to_string(), "MSFT".to_string()])
        .await
        .unwrap();
    let subscribe = recv_frame(&mut seen).await;
    assert_eq!(subscribe["action"], "subscribe");
    assert_eq!(subscribe["params"], "T.AAPL,T.MSFT");

    // Status-only frame proves liveness
    assert_eq!(transport.next_message().await.unwrap(), FeedMessage::Heartbeat);

    // The bad MSFT element is skipped, the AAPL trade survives
    match transport.next_message().await.unwrap() {
        FeedMessage::Ticks(ticks) => {
            assert_eq!(ticks.len(), 1);
            assert_eq!(ticks[0].symbol, "AAPL");
            assert_eq!(ticks[0].price, Decimal::from_str("150.5").unwrap());
            assert_eq!(ticks[0].timestamp.timestamp_millis(), 1_700_000_000_000);
        }
        other => panic!("expected ticks, got {:?}", other),
    }

    let err = transport.next_message().await.unwrap_err();
    assert!(matches!(err, FeedError::Malformed(_)));
    assert!(transport.is_connected());

    transport.unsubscribe(&["MSFT".to_string()]).await.unwrap();
    let unsubscribe = recv_frame(&mut seen).await;
    assert_eq!(unsubscribe["action"], "unsubscribe");
    assert_eq!(unsubscribe["params"], "T.MSFT");

    transport.disconnect().await.unwrap();
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_rejected_auth_fails_connect() {
    let (url, _seen) = spawn_server(
        r#"[{"ev":"status","status":"auth_failed","message":"invalid key"}]"#,
        Vec::new(),
    )
    .await;

    let mut transport = WsFeedTransport::new(config(&url));
    let err = transport.connect().await.unwrap_err();
    match err {
        FeedError::AuthFailed(message) => assert_eq!(message, "invalid key"),
        other => panic!("expected auth failure, got {:?}", other),
    }
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a port with no listener
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut transport = WsFeedTransport::new(config(&url));
    assert!(transport.connect().await.is_err());
    assert!(!transport.is_connected());
}
