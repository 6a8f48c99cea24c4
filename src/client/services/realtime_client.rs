//! Realtime client for a research-group view: one websocket per open view,
//! inbound frames merged into shared chat state, an outbound send primitive.
//!
//! The connection state machine is explicit but deliberately performs no
//! automatic reconnect: a dropped socket stays disconnected until the view
//! is reopened. That gap is inherited from the source behavior and is not
//! silently "fixed" here.

use crate::client::services::api_client::ApiClient;
use crate::common::models::{ChatMessage, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// In-memory state of one open group view. Messages are append-only in
/// arrival order; the online set is replaced wholesale on every status
/// frame, never merged.
#[derive(Debug, Default)]
pub struct GroupChatState {
    pub messages: Vec<ChatMessage>,
    pub online_users: Vec<String>,
}

impl GroupChatState {
    /// Merge one inbound frame. Returns true when the frame carried a chat
    /// message, which is the trigger for the read receipt.
    pub fn apply(&mut self, frame: ServerFrame) -> bool {
        match frame {
            ServerFrame::Message { data } => {
                self.messages.push(data);
                true
            }
            ServerFrame::Status { online_users } => {
                self.online_users = online_users;
                false
            }
        }
    }
}

pub struct GroupRealtimeClient {
    group_id: String,
    state: Arc<Mutex<GroupChatState>>,
    connection: Arc<watch::Sender<ConnectionState>>,
    outgoing: mpsc::UnboundedSender<String>,
    reader: tokio::task::JoinHandle<()>,
    writer: tokio::task::JoinHandle<()>,
}

impl GroupRealtimeClient {
    /// Open the socket for `group_id`, seeding the view with the already
    /// fetched message history. The caller must have completed the initial
    /// group/history fetch; the session token rides on the URL as a query
    /// credential.
    pub async fn connect(
        api: ApiClient,
        group_id: &str,
        token: &str,
        history: Vec<ChatMessage>,
    ) -> anyhow::Result<Self> {
        let mut url = api.ws_endpoint(&format!("research-groups/{group_id}/ws"))?;
        url.query_pairs_mut().append_pair("token", token);
        Self::connect_to(api, url, group_id, history).await
    }

    /// Like [`connect`](Self::connect) with an explicit socket URL.
    pub async fn connect_to(
        api: ApiClient,
        url: Url,
        group_id: &str,
        history: Vec<ChatMessage>,
    ) -> anyhow::Result<Self> {
        let connection = Arc::new(watch::channel(ConnectionState::Connecting).0);
        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|err| {
            connection.send_replace(ConnectionState::Disconnected);
            anyhow::anyhow!("socket connect failed: {err}")
        })?;
        connection.send_replace(ConnectionState::Connected);

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let state = Arc::new(Mutex::new(GroupChatState {
            messages: history,
            online_users: Vec::new(),
        }));

        // outbound frames are raw text, drained until the sink dies
        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let reader_state = state.clone();
        let reader_connection = connection.clone();
        let reader_group = group_id.to_string();
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        // malformed frames are dropped without a trace
                        let Ok(frame) = serde_json::from_str::<ServerFrame>(&text) else {
                            continue;
                        };
                        let had_message = reader_state.lock().await.apply(frame);
                        if had_message {
                            // best-effort read receipt; may race with rapid
                            // messages, the backend tolerates duplicates
                            let api = api.clone();
                            let gid = reader_group.clone();
                            tokio::spawn(async move {
                                if let Err(err) =
                                    api.post_unit(&format!("/research-groups/{gid}/read")).await
                                {
                                    log::debug!("mark-read for group {gid} failed: {err}");
                                }
                            });
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        log::debug!("socket error for group {reader_group}: {err}");
                        break;
                    }
                }
            }
            reader_connection.send_replace(ConnectionState::Disconnected);
        });

        Ok(Self {
            group_id: group_id.to_string(),
            state,
            connection,
            outgoing: out_tx,
            reader,
            writer,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Shared view state consumed by the chat view.
    pub fn chat(&self) -> Arc<Mutex<GroupChatState>> {
        self.state.clone()
    }

    /// Write the raw content onto the socket. A silent no-op unless the
    /// connection is currently open; callers are not informed of the drop.
    pub fn send(&self, content: &str) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        let _ = self.outgoing.send(content.to_string());
    }

    /// View teardown: close the socket and end both tasks.
    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
        self.connection.send_replace(ConnectionState::Disconnected);
    }
}

impl Drop for GroupRealtimeClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
