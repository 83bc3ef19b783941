// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Downstream WebSocket upgrade at `/ws/{slug}`: negotiates the
//! subprotocol, resolves the target's manager, and pumps a client session's
//! replay + live events over the socket.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::protocol::{self, DownstreamRequest, SUBPROTOCOL};
use crate::state::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub lookback: Option<String>,
}

/// `GET /ws/{slug}`. Negotiation failure closes with code `1002`; an
/// unknown slug destroys the socket outright.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<WsQuery>,
    offered_protocols: OfferedProtocols,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if slug.is_empty() {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    }

    if protocol::negotiate_subprotocol(&offered_protocols.0).is_none() {
        return ws.on_upgrade(|socket| async move { reject_unsupported_protocol(socket).await }).into_response();
    }

    let manager = match state.registry.get_or_create(&slug).await {
        Ok(manager) => manager,
        Err(_unknown_slug) => return axum::http::StatusCode::NOT_FOUND.into_response(),
    };

    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| handle_session(socket, manager, query.lookback))
        .into_response()
}

/// Close immediately with the standard code and reason for a subprotocol
/// negotiation failure.
async fn reject_unsupported_protocol(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: 1002,
            reason: "Unsupported protocol".into(),
        })))
        .await;
}

/// Pump one client's attach session over the upgraded socket until
/// either side closes. Detach happens on drop of `session` when this
/// function returns, binding it to the raw socket's close.
async fn handle_session(
    socket: WebSocket,
    manager: Arc<crate::manager::TargetManager>,
    lookback: Option<String>,
) {
    let mut session = manager.attach(lookback.as_deref()).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    for (id, channel) in &session.channels {
        let event = protocol::DownstreamEvent::AddChannel { server_channel_id: *id, channel: channel.clone() };
        if send_event(&mut ws_tx, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = session.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut ws_tx, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(DownstreamRequest::Subscribe { server_channel_id }) =
                            serde_json::from_str::<DownstreamRequest>(&text)
                        {
                            session.subscribe(server_channel_id);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    session.detach();
}

async fn send_event(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &protocol::DownstreamEvent,
) -> Result<(), axum::Error> {
    let Ok(text) = serde_json::to_string(event) else { return Ok(()) };
    ws_tx.send(Message::Text(text.into())).await
}

/// Extractor for the client-offered `Sec-WebSocket-Protocol` list, parsed
/// ahead of the upgrade so negotiation failure can be distinguished from an
/// unknown slug (negotiation runs before the registry lookup).
pub struct OfferedProtocols(pub Vec<String>);

impl<S> axum::extract::FromRequestParts<S> for OfferedProtocols
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let offered = parts
            .headers
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').map(|p| p.trim().to_owned()).collect())
            .unwrap_or_default();
        Ok(Self(offered))
    }
}
