//! WebSocket Smoke Test
//!
//! One shard over a real socket: `WebSocketConnector` against an in-process
//! `tokio-tungstenite` server on a loopback port.
//!
//! Run with: cargo test -p integration-tests --test websocket

use anyhow::{bail, Result};
use futures_util::{SinkExt, StreamExt};
use fluxer_gateway::protocol::{HelloPayload, IdentifyPayload};
use fluxer_gateway::{
    ConnectionState, GatewayMessage, NoopHandler, NoopIdentifyGate, ShardConnection,
    ShardDescriptor, WebSocketConnector,
};
use integration_tests::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Accept one client, walk it through the handshake, and report what it
/// identified with and how it closed.
async fn serve_one(listener: TcpListener) -> Result<(IdentifyPayload, Option<u16>)> {
    let (stream, _) = listener.accept().await?;
    let mut ws = tokio_tungstenite::accept_async(stream).await?;

    let hello = GatewayMessage::hello(HelloPayload::with_interval(HEARTBEAT_INTERVAL_MS))?;
    ws.send(Message::Text(hello.to_json()?)).await?;

    let identify = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let message = GatewayMessage::from_json(&text)?;
                if let Some(identify) = message.as_identify() {
                    break identify;
                }
            }
            Some(Ok(_)) => {}
            other => bail!("Socket ended before Identify: {other:?}"),
        }
    };

    let ready = GatewayMessage::dispatch("READY", 1, ready_payload("ws-session", None, [0, 1]));
    ws.send(Message::Text(ready.to_json()?)).await?;

    let code = loop {
        match ws.next().await {
            Some(Ok(Message::Close(frame))) => break frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => {}
            other => bail!("Socket ended without a close frame: {other:?}"),
        }
    };

    Ok((identify, code))
}

#[tokio::test]
async fn test_handshake_over_websocket() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(serve_one(listener));

    let config = test_config().with_gateway_url(format!("ws://{addr}/"));
    let shard = ShardConnection::new(
        ShardDescriptor::new(0, 1)?,
        Arc::new(config),
        Arc::new(WebSocketConnector),
        Arc::new(NoopIdentifyGate),
        Arc::new(NoopHandler),
    );

    tokio::time::timeout(Duration::from_secs(10), shard.open()).await??;
    assert_eq!(shard.state(), ConnectionState::Connected);
    assert_eq!(shard.session().session_id.as_deref(), Some("ws-session"));

    shard.close().await;
    assert_eq!(shard.state(), ConnectionState::Closed);

    let (identify, code) = tokio::time::timeout(Duration::from_secs(10), server).await???;
    assert_eq!(identify.token, TOKEN);
    assert_eq!(identify.shard, Some([0, 1]));
    assert_eq!(code, Some(1000));

    Ok(())
}
