use std::sync::Arc;

use anyhow::{Context, Result};
use shared::domain::{ChatMessage, ConnectionState, ConnectionTarget};
use storage::ChatStore;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    attachments::{AttachmentTracker, PendingAttachment},
    connection::ConnectionManager,
    events::{ChatEvent, ChatEvents, EventQueue},
};

/// Most recent messages kept when history is persisted.
pub const MAX_HISTORY: usize = 200;

pub fn trim_history(messages: &[ChatMessage]) -> &[ChatMessage] {
    &messages[messages.len().saturating_sub(MAX_HISTORY)..]
}

struct SessionState {
    target: ConnectionTarget,
    history: Vec<ChatMessage>,
    connection_state: ConnectionState,
    typing: bool,
}

/// Headless chat screen: owns the history, stages attachments and keeps the
/// connection pointed at the configured server.
///
/// Subscribers see each event after the session state reflects it. A
/// subscriber that lags may miss events; the history never does.
pub struct ChatSession {
    connection: Arc<ConnectionManager>,
    store: Arc<dyn ChatStore>,
    uploads: Arc<AttachmentTracker>,
    inbound: EventQueue,
    updates: ChatEvents,
    state: Arc<Mutex<SessionState>>,
    pump: JoinHandle<()>,
}

impl ChatSession {
    /// Opens the session. An explicit `target` is saved and used; otherwise
    /// the stored one is loaded. Connects only when a server URL is set.
    pub async fn open(
        connection: Arc<ConnectionManager>,
        store: Arc<dyn ChatStore>,
        uploads: Arc<AttachmentTracker>,
        target: Option<ConnectionTarget>,
    ) -> Result<Self> {
        let target = match target {
            Some(target) => {
                store
                    .save_connection(&target)
                    .await
                    .context("failed to save connection settings")?;
                target
            }
            None => store
                .load_connection()
                .await
                .context("failed to load connection settings")?,
        };
        uploads.set_target(target.clone()).await;

        let history = match store.load_chat_history().await {
            Ok(history) => history,
            Err(err) => {
                warn!(error = %err, "failed to load chat history; starting empty");
                Vec::new()
            }
        };
        info!(messages = history.len(), "chat history loaded");

        let (inbound, inbound_rx) = EventQueue::new();
        let updates = ChatEvents::new();
        let state = Arc::new(Mutex::new(SessionState {
            target: target.clone(),
            history,
            connection_state: connection.state(),
            typing: false,
        }));
        let pump = tokio::spawn(pump_events(
            inbound_rx,
            Arc::clone(&state),
            Arc::clone(&store),
            updates.clone(),
        ));

        let session = Self {
            connection,
            store,
            uploads,
            inbound,
            updates,
            state,
            pump,
        };
        session.connect_to(target).await;
        Ok(session)
    }

    /// Points the session at a new server, saving it first.
    pub async fn reconfigure(&self, target: ConnectionTarget) -> Result<()> {
        self.store
            .save_connection(&target)
            .await
            .context("failed to save connection settings")?;
        self.uploads.set_target(target.clone()).await;
        self.state.lock().await.target = target.clone();
        self.connect_to(target).await;
        Ok(())
    }

    async fn connect_to(&self, target: ConnectionTarget) {
        if target.is_configured() {
            self.connection
                .connect(target, Arc::new(self.inbound.clone()))
                .await;
        } else {
            info!("no server configured; staying offline");
            self.connection.disconnect().await;
        }
    }

    /// Sends `text` plus links for every ready attachment. Returns `None`
    /// when there is nothing to send.
    pub async fn send(&self, text: &str) -> Option<ChatMessage> {
        let text = text.trim();
        if text.is_empty() && !self.uploads.has_ready().await {
            return None;
        }

        let content = self.uploads.compose_content(text).await;
        let message = self.connection.send(content);
        {
            let mut state = self.state.lock().await;
            state.history.push(message.clone());
            persist(self.store.as_ref(), &state.history).await;
        }
        self.uploads.clear().await;
        self.updates.emit(ChatEvent::Message(message.clone()));
        Some(message)
    }

    pub async fn clear_history(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.history.clear();
        self.store
            .clear_chat_history()
            .await
            .context("failed to clear chat history")
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.state.lock().await.history.clone()
    }

    pub async fn attachments(&self) -> Vec<PendingAttachment> {
        self.uploads.snapshot().await
    }

    pub fn uploads(&self) -> &Arc<AttachmentTracker> {
        &self.uploads
    }

    pub async fn target(&self) -> ConnectionTarget {
        self.state.lock().await.target.clone()
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.lock().await.connection_state
    }

    pub async fn is_typing(&self) -> bool {
        self.state.lock().await.typing
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.updates.subscribe()
    }

    /// Disconnects and stops the event pump.
    pub async fn close(self) {
        self.connection.disconnect().await;
        self.pump.abort();
    }
}

async fn pump_events(
    mut inbound: mpsc::UnboundedReceiver<ChatEvent>,
    state: Arc<Mutex<SessionState>>,
    store: Arc<dyn ChatStore>,
    updates: ChatEvents,
) {
    while let Some(event) = inbound.recv().await {
        {
            let mut state = state.lock().await;
            match &event {
                ChatEvent::StateChanged(connection_state) => {
                    state.connection_state = *connection_state;
                }
                ChatEvent::Typing(typing) => state.typing = *typing,
                ChatEvent::SessionId(_) => {}
                ChatEvent::Message(message) => {
                    state.history.push(message.clone());
                    persist(store.as_ref(), &state.history).await;
                }
                ChatEvent::Error(error) => {
                    state.history.push(ChatMessage::assistant(format!("⚠️ {error}")));
                    persist(store.as_ref(), &state.history).await;
                }
            }
        }
        updates.emit(event);
    }
}

async fn persist(store: &dyn ChatStore, history: &[ChatMessage]) {
    if let Err(err) = store.save_chat_history(trim_history(history)).await {
        warn!(error = %err, "failed to persist chat history");
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
