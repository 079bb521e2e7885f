//! End-to-end tests against a hub bound to a real socket.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing_subscriber::EnvFilter;

use hubstream::protocol::wire;
use hubstream::{ClientMessage, CloseReason, Frame, Hub, HubConfig, MIB};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start(config: HubConfig) -> Result<(std::sync::Arc<Hub>, Client)> {
    init_tracing();
    let hub = Hub::bind(config).await?;
    let (client, _) = connect_async(hub.ws_url()).await?;
    Ok((hub, client))
}

async fn send(client: &mut Client, message: &ClientMessage) -> Result<()> {
    let json = serde_json::to_string(message)?;
    client.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Next server frame, or `None` once the server closed the WebSocket.
async fn next_frame(client: &mut Client) -> Result<Option<Frame>> {
    while let Some(message) = timeout(TEST_TIMEOUT, client.next())
        .await
        .context("no frame in time")?
    {
        let message = message?;
        if matches!(message, Message::Close(_)) {
            return Ok(None);
        }
        if let Some(frame) = wire::decode_server(&message)? {
            return Ok(Some(frame));
        }
    }
    Ok(None)
}

/// Reads until the next non-Ping frame, answering Pings.
async fn next_reply(client: &mut Client) -> Result<Frame> {
    loop {
        match next_frame(client).await? {
            Some(Frame::Ping) => send(client, &ClientMessage::Pong).await?,
            Some(frame) => return Ok(frame),
            None => bail!("connection closed"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_payload_round_trip() -> Result<()> {
    let (hub, mut client) = start(HubConfig::new().with_chunk_size(64 * 1024)).await?;

    send(
        &mut client,
        &ClientMessage::RequestLargeData {
            invocation_id: 1,
            size_mb: 2,
        },
    )
    .await?;

    let Frame::Accepted {
        request_id,
        total_bytes,
        chunk_count,
        ..
    } = next_reply(&mut client).await?
    else {
        bail!("expected accepted");
    };
    assert_eq!(total_bytes, 2 * MIB);
    assert_eq!(chunk_count, 32);

    let mut payload = Vec::new();
    let mut next_seq = 0;
    loop {
        match next_reply(&mut client).await? {
            Frame::Data(chunk) => {
                assert_eq!(chunk.request_id, request_id);
                assert_eq!(chunk.seq, next_seq);
                next_seq += 1;
                payload.extend_from_slice(&chunk.bytes);
            }
            Frame::Completed { chunks, bytes, .. } => {
                assert_eq!(chunks, 32);
                assert_eq!(bytes, 2 * MIB);
                break;
            }
            other => bail!("unexpected frame {other:?}"),
        }
    }

    assert_eq!(payload.len() as u64, 2 * MIB);
    assert!(payload.iter().all(|b| (32..=126).contains(b)));
    assert_eq!(hub.connection_count(), 1);

    hub.shutdown().await;
    assert_eq!(hub.connection_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_path_is_not_found() -> Result<()> {
    init_tracing();
    let hub = Hub::bind(HubConfig::new()).await?;
    let url = format!("ws://{}/elsewhere", hub.local_addr());

    match connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        Err(e) => bail!("unexpected error {e}"),
        Ok(_) => bail!("upgrade should be refused"),
    }

    hub.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_client_ping_and_close() -> Result<()> {
    let (hub, mut client) = start(HubConfig::new()).await?;

    send(&mut client, &ClientMessage::Ping).await?;
    assert_eq!(next_frame(&mut client).await?, Some(Frame::Pong));

    send(&mut client, &ClientMessage::Close).await?;
    assert_eq!(
        next_frame(&mut client).await?,
        Some(Frame::Close {
            reason: CloseReason::Normal
        })
    );
    assert_eq!(next_frame(&mut client).await?, None);

    hub.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unknown_method_closes_with_diagnostic() -> Result<()> {
    let (hub, mut client) = start(HubConfig::new()).await?;

    client
        .send(Message::Text(r#"{"type":"subscribe"}"#.into()))
        .await?;

    match next_frame(&mut client).await? {
        Some(Frame::Close {
            reason: CloseReason::ProtocolError(message),
        }) => assert!(message.contains("invalid client message")),
        other => bail!("expected protocol error close, got {other:?}"),
    }

    hub.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_over_limit_request_keeps_connection() -> Result<()> {
    let config = HubConfig::new().with_max_payload_bytes(MIB);
    let (hub, mut client) = start(config).await?;

    send(
        &mut client,
        &ClientMessage::RequestLargeData {
            invocation_id: 5,
            size_mb: 3,
        },
    )
    .await?;
    assert!(matches!(
        next_reply(&mut client).await?,
        Frame::Rejected {
            invocation_id: 5,
            ..
        }
    ));

    send(
        &mut client,
        &ClientMessage::RequestLargeData {
            invocation_id: 6,
            size_mb: 0,
        },
    )
    .await?;
    assert!(matches!(
        next_reply(&mut client).await?,
        Frame::Accepted {
            invocation_id: 6,
            chunk_count: 0,
            ..
        }
    ));
    assert!(matches!(
        next_reply(&mut client).await?,
        Frame::Completed { chunks: 0, .. }
    ));

    hub.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_silent_client_times_out() -> Result<()> {
    let config = HubConfig::new()
        .with_heartbeat(Duration::from_millis(100), Duration::from_millis(300));
    let (hub, mut client) = start(config).await?;

    // Never answer the Ping.
    assert_eq!(next_frame(&mut client).await?, Some(Frame::Ping));
    assert_eq!(
        next_frame(&mut client).await?,
        Some(Frame::Close {
            reason: CloseReason::HeartbeatTimeout
        })
    );

    let close = timeout(TEST_TIMEOUT, client.next())
        .await
        .context("no close message")?;
    match close {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::Library(4000));
        }
        other => bail!("expected close message, got {other:?}"),
    }

    hub.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_clients() -> Result<()> {
    let (hub, mut client) = start(HubConfig::new()).await?;

    send(&mut client, &ClientMessage::Ping).await?;
    assert_eq!(next_frame(&mut client).await?, Some(Frame::Pong));

    let shutdown = {
        let hub = std::sync::Arc::clone(&hub);
        tokio::spawn(async move { hub.shutdown().await })
    };

    assert_eq!(
        next_frame(&mut client).await?,
        Some(Frame::Close {
            reason: CloseReason::ServerShutdown
        })
    );
    shutdown.await?;
    assert_eq!(hub.connection_count(), 0);
    Ok(())
}
