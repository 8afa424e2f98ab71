//! WebSocket protocol for live poll rooms.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use slotvote_core::SlotUpdates;
use slotvote_db::entities::vote::VoteResponse;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use crate::middleware::AppState;
use crate::presence::{ConnectionId, LiveRegistry, PresenceSnapshot};

/// Client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter a poll room.
    JoinPoll {
        poll_token: String,
        #[serde(default)]
        voter_name: Option<String>,
        session_id: String,
        #[serde(default)]
        is_presenter: bool,
    },
    /// Leave the current room.
    LeavePoll,
    /// Select (`response` set) or deselect (`null`) an option before submitting.
    VoteInProgress {
        option_id: String,
        response: Option<VoteResponse>,
    },
    /// The voter's vote was stored.
    VoteSubmitted {
        #[serde(default)]
        voter_name: Option<String>,
    },
    StartPresenting,
    StopPresenting,
    UpdateName { voter_name: String },
    Ping,
}

/// Server-to-client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Reply to `join_poll`.
    Joined {
        session_id: String,
        #[serde(flatten)]
        presence: PresenceSnapshot,
    },
    PresenceUpdate {
        #[serde(flatten)]
        presence: PresenceSnapshot,
    },
    /// A voter changed an in-progress selection.
    LiveVoteUpdate {
        session_id: String,
        #[serde(flatten)]
        presence: PresenceSnapshot,
    },
    /// A voter submitted and left the in-progress list.
    VoteFinalized {
        session_id: String,
        voter_name: String,
        #[serde(flatten)]
        presence: PresenceSnapshot,
    },
    /// Stored results changed; clients should reload them.
    ResultsRefresh { poll_token: String },
    /// Fresh booking counters per option.
    SlotUpdate {
        poll_token: String,
        updates: SlotUpdates,
    },
    Pong,
}

struct JoinedRoom {
    poll_token: String,
    session_id: String,
}

/// Protocol state of one connection.
///
/// Messages are handled to completion one at a time, in receipt order.
pub struct LiveSession {
    registry: LiveRegistry,
    connection_id: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
    max_message_bytes: usize,
    joined: Option<JoinedRoom>,
    evicted: Arc<Notify>,
}

impl LiveSession {
    /// Create a session that delivers outbound messages through `tx`.
    #[must_use]
    pub fn new(
        registry: LiveRegistry,
        tx: mpsc::Sender<ServerMessage>,
        max_message_bytes: usize,
    ) -> Self {
        let connection_id = registry.next_connection_id();
        Self {
            registry,
            connection_id,
            tx,
            max_message_bytes,
            joined: None,
            evicted: Arc::new(Notify::new()),
        }
    }

    /// Notified when the registry drops this connection from its room, after
    /// which the connection should be closed.
    #[must_use]
    pub fn eviction_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.evicted)
    }

    /// Parse and handle one text frame. Invalid frames are logged and dropped.
    pub async fn handle_text(&mut self, text: &str) {
        if text.len() > self.max_message_bytes {
            warn!(
                connection_id = self.connection_id,
                size = text.len(),
                "Dropping oversized message"
            );
            return;
        }

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => warn!(connection_id = self.connection_id, error = %e, "Failed to parse client message"),
        }
    }

    /// Handle one client message.
    pub async fn handle(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::JoinPoll {
                poll_token,
                voter_name,
                session_id,
                is_presenter,
            } => {
                if poll_token.is_empty() || session_id.is_empty() {
                    warn!(connection_id = self.connection_id, "join_poll without pollToken or sessionId");
                    return;
                }
                self.leave().await;

                let voter_name = voter_name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty());
                self.registry
                    .join(
                        &poll_token,
                        &session_id,
                        voter_name,
                        is_presenter,
                        self.connection_id,
                        self.tx.clone(),
                        Arc::clone(&self.evicted),
                    )
                    .await;
                self.joined = Some(JoinedRoom {
                    poll_token,
                    session_id,
                });
            }
            ClientMessage::LeavePoll => self.leave().await,
            ClientMessage::VoteInProgress {
                option_id,
                response,
            } => {
                let Some(room) = self.joined_room("vote_in_progress") else {
                    return;
                };
                let applied = self
                    .registry
                    .set_in_progress(
                        &room.poll_token,
                        &room.session_id,
                        self.connection_id,
                        &option_id,
                        response,
                    )
                    .await;
                if !applied {
                    debug!(session_id = %room.session_id, "vote_in_progress from non-voter ignored");
                }
            }
            ClientMessage::VoteSubmitted { voter_name } => {
                let Some(room) = self.joined_room("vote_submitted") else {
                    return;
                };
                self.registry
                    .submitted(
                        &room.poll_token,
                        &room.session_id,
                        self.connection_id,
                        voter_name.as_deref().unwrap_or_default().trim(),
                    )
                    .await;
            }
            ClientMessage::StartPresenting => self.set_presenting(true).await,
            ClientMessage::StopPresenting => self.set_presenting(false).await,
            ClientMessage::UpdateName { voter_name } => {
                let name = voter_name.trim();
                if name.is_empty() {
                    debug!(connection_id = self.connection_id, "update_name with blank name ignored");
                    return;
                }
                let Some(room) = self.joined_room("update_name") else {
                    return;
                };
                self.registry
                    .rename(&room.poll_token, &room.session_id, self.connection_id, name)
                    .await;
            }
            ClientMessage::Ping => {
                if self.tx.try_send(ServerMessage::Pong).is_err() {
                    debug!(connection_id = self.connection_id, "Outbound queue unavailable for pong");
                }
            }
        }
    }

    /// Leave the current room, if any. Called on close and error too.
    pub async fn leave(&mut self) {
        if let Some(room) = self.joined.take() {
            self.registry
                .leave(&room.poll_token, &room.session_id, self.connection_id)
                .await;
        }
    }

    async fn set_presenting(&self, is_presenter: bool) {
        let Some(room) = self.joined_room("presenting") else {
            return;
        };
        self.registry
            .set_presenting(
                &room.poll_token,
                &room.session_id,
                self.connection_id,
                is_presenter,
            )
            .await;
    }

    fn joined_room(&self, kind: &str) -> Option<&JoinedRoom> {
        let room = self.joined.as_ref();
        if room.is_none() {
            warn!(connection_id = self.connection_id, kind, "Message before join_poll ignored");
        }
        room
    }
}

/// WebSocket handler for live poll rooms.
pub async fn live_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.live_config.outbound_buffer);

    // Sole writer of the socket; everything outbound goes through `tx`.
    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize server message");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = LiveSession::new(
        state.live.clone(),
        tx,
        state.live_config.max_message_bytes,
    );
    info!(connection_id = session.connection_id, "Live connection established");
    let evicted = session.eviction_signal();

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                // tungstenite answers pings on its own
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = session.connection_id, error = %e, "WebSocket error");
                    break;
                }
            },
            _ = &mut writer => break,
            () = evicted.notified() => {
                info!(connection_id = session.connection_id, "Closing evicted live connection");
                break;
            }
        }
    }

    session.leave().await;
    writer.abort();
    info!(connection_id = session.connection_id, "Live connection closed");
}
