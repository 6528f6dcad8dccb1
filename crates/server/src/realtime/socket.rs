//! WebSocket transport for the realtime core.
//!
//! `GET /ws?token=...` (or `Authorization: Bearer ...`). The credential is
//! verified before the upgrade, so an unauthenticated socket never touches
//! the registry.

use super::{ClientEvent, Hub, OutboundFrame};
use crate::core::auth::bearer_token;
use crate::core::config::AppState;
use crate::core::error::{Error, Result};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// Keepalive settings for one socket.
#[derive(Debug, Clone, Copy)]
pub struct SocketTiming {
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
}

/// GET /ws
pub async fn ws_connect(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response> {
    let token = match params.token {
        Some(token) => token,
        None => bearer_token(&headers)?.to_string(),
    };

    let user_id = state
        .identity
        .verify_connection_credential(&token)
        .await
        .map_err(|e| {
            warn!("[Gateway] Handshake rejected: {}", e);
            Error::from(e)
        })?;

    let hub = state.hub.clone();
    let timing = SocketTiming {
        heartbeat_interval: state.config.heartbeat_interval,
        idle_timeout: state.config.idle_timeout,
    };

    Ok(ws.on_upgrade(move |socket| serve_socket(socket, hub, user_id, timing)))
}

/// Drive one authenticated socket until it closes, then clean up once.
pub async fn serve_socket(socket: WebSocket, hub: Hub, user_id: String, timing: SocketTiming) {
    let (session, outbound) = hub.open_session(&user_id);
    let connection_id = session.connection_id();
    let (sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(write_loop(sink, outbound, timing.heartbeat_interval));

    loop {
        tokio::select! {
            next = tokio::time::timeout(timing.idle_timeout, stream.next()) => {
                match next {
                    Err(_) => {
                        info!("[Session] {} idle for {:?}, closing", connection_id, timing.idle_timeout);
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        debug!("[Session] {} read error: {}", connection_id, e);
                        break;
                    }
                    Ok(Some(Ok(WsMessage::Text(text)))) => match ClientEvent::parse(text.as_str()) {
                        Some(event) => hub.dispatch(&session, event).await,
                        None => debug!("[Session] {} ignoring unrecognised frame", connection_id),
                    },
                    Ok(Some(Ok(WsMessage::Close(_)))) => break,
                    // Pings are answered by the transport; pongs and binary only count as activity
                    Ok(Some(Ok(_))) => {}
                }
            }
            _ = &mut writer => {
                debug!("[Session] {} writer finished", connection_id);
                break;
            }
        }
    }

    session.close();
    // Dropping the registry's sender ends the writer; abort covers a stuck flush
    writer.abort();
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if sink.send(WsMessage::Text(frame.as_str().into())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}
