use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::commands::CommandHandler;
use crate::lifecycle::ConnectionLifecycle;
use crate::protocol::Outbound;
use crate::registry::ConnectionRegistry;

/// What a WebSocket session needs from the rest of the server.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub lifecycle: Arc<ConnectionLifecycle>,
    pub commands: Arc<CommandHandler>,
    pub heartbeat_interval: Duration,
    pub shutdown: CancellationToken,
}

/// Drive one WebSocket connection from accept to disconnect.
///
/// The writer drains the connection's outbound queue and sends pings. The
/// reader applies commands in arrival order and records pongs. When either
/// side stops, the connection is unregistered and its subscriptions removed.
pub async fn run_session(socket: WebSocket, ctx: SessionContext) {
    let (connection_id, mut rx) = ctx.registry.register();
    ctx.lifecycle.on_connect(&connection_id);
    ctx.registry.mark_connected(&connection_id);

    match (Outbound::Connected {
        connection_id: connection_id.clone(),
    })
    .to_json()
    {
        Ok(hello) => {
            ctx.registry.send(&connection_id, hello);
        }
        Err(e) => tracing::error!(error = %e, "failed to encode connected frame"),
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = connection_id.clone();
    let heartbeat = ctx.heartbeat_interval;
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_id, "sent ping");
                }
            }
        }
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    let reader_id = connection_id.clone();
    let reader_registry = Arc::clone(&ctx.registry);
    let commands = Arc::clone(&ctx.commands);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    commands.handle(&reader_id, text.as_str()).await;
                }
                WsMessage::Pong(_) => reader_registry.record_pong(&reader_id),
                WsMessage::Close(_) => break,
                WsMessage::Binary(_) => {
                    tracing::debug!(connection_id = %reader_id, "ignoring binary frame");
                }
                WsMessage::Ping(_) => {}
            }
        }
    });

    let writer_done = tokio::select! {
        _ = &mut writer => true,
        _ = &mut reader => false,
        _ = ctx.shutdown.cancelled() => false,
    };
    reader.abort();

    // Dropping the queue lets the writer flush a close frame and exit.
    ctx.registry.unregister(&connection_id);
    if !writer_done && tokio::time::timeout(Duration::from_secs(1), &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(connection_id = %connection_id, "transport connection lost");
    ctx.lifecycle.on_disconnect(&connection_id).await;
}
