//! WebSocket connection lifecycle: handshake, then independent read and write loops.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hostlink_core::protocol::{codes, CommandEnvelope, CommandResponse, CommandResult};

use crate::events::{self, InboundMessage, OutboundFrame};
use crate::frame::{self, ReadError};
use crate::handshake;
use crate::request;
use crate::state::GatewayState;

const MAX_HANDSHAKE_BYTES: usize = 8 * 1024;

/// Serve one accepted WebSocket connection until it closes or the server stops.
pub async fn handle_ws_connection(
    state: Arc<GatewayState>,
    mut stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) {
    let read_timeout = Duration::from_millis(state.config.read_timeout_ms);
    let (head, leftover) = match tokio::time::timeout(
        read_timeout,
        request::read_head(&mut stream, MAX_HANDSHAKE_BYTES),
    )
    .await
    {
        Ok(Ok(Some(parts))) => parts,
        Ok(Ok(None)) => {
            debug!(%peer, "Closed before handshake");
            return;
        }
        Ok(Err(e)) => {
            debug!(%peer, %e, "Bad handshake request");
            reject(&mut stream).await;
            return;
        }
        Err(_) => {
            debug!(%peer, "Handshake timed out");
            return;
        }
    };

    let key = match handshake::validate(&head) {
        Ok(key) => key,
        Err(e) => {
            warn!(%peer, %e, path = %head.path, "Rejecting non-WebSocket request");
            reject(&mut stream).await;
            return;
        }
    };
    if let Err(e) = stream
        .write_all(handshake::switching_protocols(key).as_bytes())
        .await
    {
        debug!(%peer, %e, "Failed to send handshake response");
        return;
    }

    let conn_id = Uuid::new_v4();
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    // Welcome goes first so no broadcast can overtake it.
    if state.config.websocket.welcome {
        if let Ok(frame) = frame::encode_text(&events::welcome_message()) {
            let _ = tx.send(frame.into());
        }
    }

    state.broadcast.add(conn_id, peer, tx.clone());
    state.stats.record_connection();
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_connect();
    info!(
        conn_id = %conn_id,
        %peer,
        connections = state.broadcast.len(),
        "WebSocket client connected"
    );

    // Writer: drains this connection's queue. Ends once every sender is gone.
    let registry = state.broadcast.clone();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_half.write_all(&frame).await {
                debug!(conn_id = %conn_id, %e, "Write failed; dropping connection");
                registry.remove(conn_id);
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut reader = Cursor::new(leftover).chain(read_half);
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = frame::read_frame(&mut reader) => next,
        };

        match next {
            Ok(Some(frame)) if frame.is_close() => {
                debug!(conn_id = %conn_id, "Client sent close");
                break;
            }
            Ok(Some(frame)) => match frame.into_text() {
                Ok(text) => on_text(&state, conn_id, text, &tx),
                Err(e) => debug!(conn_id = %conn_id, %e, "Ignoring frame"),
            },
            Ok(None) => break,
            Err(ReadError::Frame(e)) => {
                warn!(conn_id = %conn_id, %e, "Unsupported frame; closing connection");
                break;
            }
            Err(ReadError::Io(e)) => {
                debug!(conn_id = %conn_id, %e, "Read failed");
                break;
            }
        }
    }

    state.broadcast.remove(conn_id);
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_disconnect();
    info!(
        conn_id = %conn_id,
        connections = state.broadcast.len(),
        "WebSocket client disconnected"
    );
}

async fn reject(stream: &mut TcpStream) {
    let _ = stream.write_all(handshake::BAD_REQUEST).await;
    let _ = stream.shutdown().await;
}

/// Route one text message to the host's inbound channel. Command envelopes
/// are also executed and answered on this connection only.
fn on_text(
    state: &Arc<GatewayState>,
    conn_id: Uuid,
    text: String,
    reply: &mpsc::UnboundedSender<OutboundFrame>,
) {
    if state.config.websocket.dispatch_commands {
        if let Ok(envelope) = CommandEnvelope::parse(text.as_bytes()) {
            let state = Arc::clone(state);
            let reply = reply.clone();
            tokio::spawn(async move {
                let command_id = envelope.id().map(str::to_string);
                let result = state.execute(envelope).await;
                if let Some(frame) = encode_response(command_id, result) {
                    let _ = reply.send(frame);
                }
            });
        }
    }

    debug!(conn_id = %conn_id, bytes = text.len(), "Inbound message");
    state.deliver_inbound(InboundMessage { conn_id, text });
}

fn encode_response(command_id: Option<String>, result: CommandResult) -> Option<OutboundFrame> {
    let encode = |response: &CommandResponse| {
        serde_json::to_string(response)
            .ok()
            .and_then(|text| frame::encode_text(&text).ok())
    };

    let response = CommandResponse { command_id, result };
    if let Some(frame) = encode(&response) {
        return Some(frame.into());
    }

    warn!(command_id = ?response.command_id, "Command response too large for one frame");
    let fallback = CommandResponse {
        command_id: response.command_id,
        result: CommandResult::failure(
            "Command result exceeds the maximum frame size",
            codes::HANDLER_ERROR,
        ),
    };
    encode(&fallback).map(Into::into)
}
