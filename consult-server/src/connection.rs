//! WebSocket transport glue.
//!
//! One task per connection: the upgrade callback captures the bearer
//! token (query string or `Authorization` header) and enforces the
//! optional origin allow-list, then the socket loop feeds inbound frames
//! to the coordinator one at a time (the per-socket ordering guarantee)
//! while a send task drains the socket's mailbox.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::events::ClientEvent;

/// Accept a WebSocket upgrade and run the connection until it closes.
pub async fn serve(
    stream:         TcpStream,
    addr:           SocketAddr,
    coordinator:    Arc<Coordinator>,
    allowed_origin: Option<String>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let token = Arc::new(Mutex::new(None::<String>));
    let token_slot = token.clone();

    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if let Some(allowed) = &allowed_origin {
            let origin = req
                .headers()
                .get("origin")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if origin != allowed {
                let mut rejection = ErrorResponse::new(Some("origin not allowed".into()));
                *rejection.status_mut() = StatusCode::FORBIDDEN;
                return Err(rejection);
            }
        }
        *token_slot.lock().unwrap() = bearer_from_request(req);
        Ok(resp)
    };

    let ws = accept_hdr_async(stream, callback).await?;
    let token = token.lock().unwrap().clone();

    let socket_id = Uuid::new_v4();
    tracing::info!("[connection] socket {socket_id} connected from {addr}");

    let (mailbox_tx, mut mailbox_rx) = mpsc::unbounded_channel();
    coordinator.connect(socket_id, mailbox_tx);

    let (mut ws_tx, mut ws_rx) = ws.split();

    // Outbound: drain the mailbox into the socket until either side closes.
    let send_task = tokio::spawn(async move {
        while let Some(event) = mailbox_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("[connection] failed to serialize outbound event: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound: one event at a time, in arrival order.
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => coordinator.handle(socket_id, token.as_deref(), event).await,
                Err(e) => {
                    tracing::debug!("[connection] socket {socket_id}: ignoring unrecognised event: {e}");
                }
            },
            Ok(Message::Close(_)) => break,
            // tungstenite answers pings on its own.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            Ok(Message::Binary(_)) => {
                tracing::debug!("[connection] socket {socket_id}: ignoring binary frame");
            }
            Err(e) => {
                tracing::debug!("[connection] socket {socket_id}: read error: {e}");
                break;
            }
        }
    }

    coordinator.disconnect(socket_id);
    send_task.abort();
    tracing::info!("[connection] socket {socket_id} closed");

    Ok(())
}

fn bearer_from_request(req: &Request) -> Option<String> {
    if let Some(value) = req.headers().get("authorization") {
        if let Ok(header) = value.to_str() {
            if let Some(token) = header.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    req.uri().query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token=").map(str::to_string))
    })
}
