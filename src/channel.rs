//! Realtime channel: a duplex WebSocket multiplexed into per-root rooms.
//!
//! Wire format is JSON text frames with an `{"event": ..., "payload": ...}`
//! envelope. A client only receives events for rooms it has joined
//! (typically every root currently on screen).
//!
//! Reconnection does not replay missed events — there is no log or offset
//! tracking. Instead the client re-joins its rooms and performs a full
//! re-fetch of their records ([`crate::store::RecordStore::resync`]). This
//! bounds protocol complexity at the cost of a full resync window after any
//! disconnect.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::record::RawRecord;
use crate::store::RecordStore;

/// Client → server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "JOIN_ROOM", rename_all = "camelCase")]
    JoinRoom { root_id: String },
    #[serde(rename = "LEAVE_ROOM", rename_all = "camelCase")]
    LeaveRoom { root_id: String },
    #[serde(rename = "USER_MESSAGE", rename_all = "camelCase")]
    UserMessage { target_id: Uuid, payload: Value },
    /// Update stream for a just-persisted local change
    #[serde(rename = "CHANGED_DOCUMENT", rename_all = "camelCase")]
    ChangedDocument {
        record_id: Uuid,
        data: Value,
        updated_at: u64,
    },
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "NEW_RECORD")]
    NewRecord(RawRecord),
    #[serde(rename = "CHANGED_RECORD")]
    ChangedRecord(RawRecord),
    #[serde(rename = "DELETED_RECORD", rename_all = "camelCase")]
    DeletedRecord { record_id: Uuid },
    /// Narrow high-frequency variant: apply this data+updatedAt to this id
    #[serde(rename = "CHANGED_DOCUMENT", rename_all = "camelCase")]
    ChangedDocument {
        record_id: Uuid,
        data: Value,
        updated_at: u64,
    },
    #[serde(rename = "CONNECTED_CLIENTS", rename_all = "camelCase")]
    ConnectedClients { root_id: String, count: usize },
    #[serde(rename = "USER_MESSAGE", rename_all = "camelCase")]
    UserMessage { sender_id: Uuid, payload: Value },
}

/// A relayed user message, surfaced to the application.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessage {
    pub sender_id: Uuid,
    pub payload: Value,
}

/// Connection state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the connection tasks.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Server(ServerEvent),
}

/// Channel errors.
#[derive(Debug, Clone)]
pub enum ChannelError {
    ConnectFailed(String),
    Closed,
    Serialization(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed(e) => write!(f, "Failed to connect: {e}"),
            Self::Closed => write!(f, "Channel closed"),
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// The realtime channel client.
///
/// Manages the WebSocket connection, room membership, and the reconnect
/// loop. Record events are applied to the store; user messages are
/// forwarded to the application through their own stream.
pub struct ChannelClient {
    /// Server URL, e.g. `ws://host:port/realtime`
    url: String,

    state: Arc<RwLock<ChannelState>>,

    /// Rooms to be (re-)joined on every (re-)connect
    joined: Arc<RwLock<HashSet<String>>>,

    /// Sender feeding the WebSocket writer task
    outgoing_tx: Arc<RwLock<Option<mpsc::Sender<ClientEvent>>>>,

    event_tx: mpsc::Sender<ChannelEvent>,
    event_rx: Option<mpsc::Receiver<ChannelEvent>>,

    user_msg_tx: mpsc::Sender<UserMessage>,
    user_msg_rx: Option<mpsc::Receiver<UserMessage>>,

    /// Initial reconnect backoff; doubles up to 30s
    reconnect_delay: Duration,
}

impl ChannelClient {
    pub fn new(url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (user_msg_tx, user_msg_rx) = mpsc::channel(64);
        Self {
            url: url.into(),
            state: Arc::new(RwLock::new(ChannelState::Disconnected)),
            joined: Arc::new(RwLock::new(HashSet::new())),
            outgoing_tx: Arc::new(RwLock::new(None)),
            event_tx,
            event_rx: Some(event_rx),
            user_msg_tx,
            user_msg_rx: Some(user_msg_rx),
            reconnect_delay: Duration::from_secs(1),
        }
    }

    /// Override the initial reconnect backoff.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Take the raw event receiver (can only be called once).
    ///
    /// [`ChannelClient::run`] consumes it; only take it when driving the
    /// connection manually.
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.event_rx.take()
    }

    /// Take the inbound user-message stream (can only be called once).
    pub fn take_user_messages(&mut self) -> Option<mpsc::Receiver<UserMessage>> {
        self.user_msg_rx.take()
    }

    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    pub async fn joined_rooms(&self) -> Vec<String> {
        self.joined.read().await.iter().cloned().collect()
    }

    /// Sender of the current connection, usable by the store to emit
    /// post-save updates. `None` while disconnected.
    pub async fn sender(&self) -> Option<mpsc::Sender<ClientEvent>> {
        self.outgoing_tx.read().await.clone()
    }

    /// Connect and spawn the reader/writer tasks.
    ///
    /// Every room in the joined set is re-announced, which makes the same
    /// path serve both the first connect and reconnects.
    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        *self.state.write().await = ChannelState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                *self.state.write().await = ChannelState::Disconnected;
                return Err(ChannelError::ConnectFailed(e.to_string()));
            }
        };

        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: serialize outgoing events onto the socket
        let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(256);
        *self.outgoing_tx.write().await = Some(out_tx.clone());
        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        log::error!("Failed to encode outbound event: {e}");
                        continue;
                    }
                };
                if ws_writer
                    .send(tokio_tungstenite::tungstenite::Message::Text(json.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        // Announce room membership
        for root_id in self.joined.read().await.iter() {
            let _ = out_tx
                .send(ClientEvent::JoinRoom { root_id: root_id.clone() })
                .await;
        }

        *self.state.write().await = ChannelState::Connected;
        let _ = self.event_tx.send(ChannelEvent::Connected).await;

        // Reader task: decode inbound frames into channel events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(message) = ws_reader.next().await {
                match message {
                    Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                        match serde_json::from_str::<ServerEvent>(text.as_str()) {
                            Ok(event) => {
                                let _ = event_tx.send(ChannelEvent::Server(event)).await;
                            }
                            Err(e) => {
                                log::warn!("Unparseable channel event: {e}");
                            }
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ChannelState::Disconnected;
            let _ = event_tx.send(ChannelEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Join a room; takes effect immediately when connected and is replayed
    /// on every reconnect.
    pub async fn join_room(&self, root_id: impl Into<String>) {
        let root_id = root_id.into();
        self.joined.write().await.insert(root_id.clone());
        self.send(ClientEvent::JoinRoom { root_id }).await;
    }

    pub async fn leave_room(&self, root_id: &str) {
        self.joined.write().await.remove(root_id);
        self.send(ClientEvent::LeaveRoom { root_id: root_id.to_string() }).await;
    }

    /// Relay an opaque payload to another client.
    pub async fn send_user_message(&self, target_id: Uuid, payload: Value) {
        self.send(ClientEvent::UserMessage { target_id, payload }).await;
    }

    /// Push a just-persisted local change to the other clients in the room.
    pub async fn send_update(&self, record_id: Uuid, data: Value, updated_at: u64) {
        self.send(ClientEvent::ChangedDocument { record_id, data, updated_at })
            .await;
    }

    /// Silently drops when disconnected: a reconnect triggers a full
    /// resync, which supersedes anything missed.
    async fn send(&self, event: ClientEvent) {
        let tx = self.outgoing_tx.read().await.clone();
        if let Some(tx) = tx {
            if tx.send(event).await.is_err() {
                log::debug!("Dropped outbound event: writer task gone");
            }
        }
    }

    /// Drive the channel against a record store.
    ///
    /// Owns the reconnect loop: connect, pump events into the store until
    /// the connection drops, back off, reconnect, full-resync the joined
    /// rooms, repeat. Never returns.
    pub async fn run(mut self, store: Arc<RecordStore>) {
        let mut event_rx = match self.event_rx.take() {
            Some(rx) => rx,
            None => {
                log::error!("Channel event receiver already taken; cannot run");
                return;
            }
        };

        let mut delay = self.reconnect_delay;
        let mut first_connect = true;

        loop {
            match self.connect().await {
                Ok(()) => {
                    delay = self.reconnect_delay;

                    if let Some(tx) = self.sender().await {
                        store.set_channel(tx).await;
                    }

                    // No event replay exists: after any disconnect the only
                    // way back to a consistent table is a full re-fetch of
                    // every joined root.
                    let joined = self.joined_rooms().await;
                    if !first_connect && !joined.is_empty() {
                        match store.resync(&joined).await {
                            Ok(count) => {
                                log::info!("Resynced {count} records across {} rooms", joined.len());
                                store.set_channel_connected(true);
                            }
                            Err(e) => {
                                log::warn!("Resync failed: {e}");
                                store.set_channel_connected(false);
                            }
                        }
                    } else {
                        store.set_channel_connected(true);
                    }
                    first_connect = false;

                    // Pump until the reader task reports a drop
                    while let Some(event) = event_rx.recv().await {
                        match event {
                            ChannelEvent::Disconnected => break,
                            ChannelEvent::Connected => {}
                            ChannelEvent::Server(ServerEvent::UserMessage { sender_id, payload }) => {
                                let _ = self
                                    .user_msg_tx
                                    .send(UserMessage { sender_id, payload })
                                    .await;
                            }
                            ChannelEvent::Server(event) => {
                                store.apply_server_event(event).await;
                            }
                        }
                    }

                    store.set_channel_connected(false);
                    *self.state.write().await = ChannelState::Reconnecting;
                    log::info!("Channel dropped; reconnecting in {delay:?}");
                }
                Err(e) => {
                    store.set_channel_connected(false);
                    log::warn!("Channel connect failed: {e}; retrying in {delay:?}");
                }
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(30));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_names() {
        let event = ClientEvent::JoinRoom { root_id: "r1".to_string() };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "JOIN_ROOM");
        assert_eq!(value["payload"]["rootId"], "r1");

        let event = ClientEvent::ChangedDocument {
            record_id: Uuid::new_v4(),
            data: json!({ "text": "abc" }),
            updated_at: 7,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "CHANGED_DOCUMENT");
        assert_eq!(value["payload"]["updatedAt"], 7);
    }

    #[test]
    fn test_server_event_roundtrip() {
        let raw = RawRecord {
            id: Uuid::new_v4(),
            record_type: "note".to_string(),
            author_id: None,
            parent_id: None,
            document_root_id: "r1".to_string(),
            data: json!({ "text": "x" }),
            created_at: 1,
            updated_at: 2,
        };
        let event = ServerEvent::NewRecord(raw.clone());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("NEW_RECORD"));
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ServerEvent::NewRecord(raw));
    }

    #[test]
    fn test_server_event_from_wire_json() {
        let json = r#"{
            "event": "CONNECTED_CLIENTS",
            "payload": { "rootId": "course-1:notes", "count": 3 }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ServerEvent::ConnectedClients { root_id: "course-1:notes".to_string(), count: 3 }
        );

        let json = r#"{
            "event": "DELETED_RECORD",
            "payload": { "recordId": "550e8400-e29b-41d4-a716-446655440000" }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ServerEvent::DeletedRecord { .. }));
    }

    #[tokio::test]
    async fn test_initial_state() {
        let client = ChannelClient::new("ws://localhost:9090/realtime");
        assert_eq!(client.state().await, ChannelState::Disconnected);
        assert!(client.joined_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_tracked_while_disconnected() {
        let client = ChannelClient::new("ws://localhost:9090/realtime");
        client.join_room("r1").await;
        client.join_room("r2").await;
        client.join_room("r1").await;

        let mut rooms = client.joined_rooms().await;
        rooms.sort();
        assert_eq!(rooms, vec!["r1", "r2"]);

        client.leave_room("r1").await;
        assert_eq!(client.joined_rooms().await, vec!["r2"]);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_noop() {
        let client = ChannelClient::new("ws://localhost:9090/realtime");
        // No writer task exists; sends must not error or panic
        client.send_update(Uuid::new_v4(), json!({}), 1).await;
        client.send_user_message(Uuid::new_v4(), json!("hi")).await;
    }

    #[tokio::test]
    async fn test_take_streams_once() {
        let mut client = ChannelClient::new("ws://localhost:9090/realtime");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
        assert!(client.take_user_messages().is_some());
        assert!(client.take_user_messages().is_none());
    }
}
