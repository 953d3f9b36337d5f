use shared::domain::{ChatMessage, ConnectionState};
use tokio::sync::{broadcast, mpsc};

const EVENT_CAPACITY: usize = 1024;

/// Receives everything a connection reports. All methods are called from the
/// connection's driver task, one at a time, and must not block.
pub trait ConnectionCallbacks: Send + Sync {
    fn on_state_change(&self, state: ConnectionState);
    fn on_message(&self, message: ChatMessage);
    fn on_typing(&self, typing: bool);
    fn on_error(&self, error: String);
    fn on_session_id(&self, session_id: String);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    StateChanged(ConnectionState),
    Message(ChatMessage),
    Typing(bool),
    Error(String),
    SessionId(String),
}

/// Fans events out to any number of broadcast subscribers.
#[derive(Debug, Clone)]
pub struct ChatEvents {
    sender: broadcast::Sender<ChatEvent>,
}

impl ChatEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ChatEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for ChatEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback set that queues every report for a single consumer. Nothing is
/// dropped however far the consumer falls behind.
#[derive(Debug, Clone)]
pub struct EventQueue {
    sender: mpsc::UnboundedSender<ChatEvent>,
}

impl EventQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: ChatEvent) {
        let _ = self.sender.send(event);
    }
}

impl ConnectionCallbacks for EventQueue {
    fn on_state_change(&self, state: ConnectionState) {
        self.emit(ChatEvent::StateChanged(state));
    }

    fn on_message(&self, message: ChatMessage) {
        self.emit(ChatEvent::Message(message));
    }

    fn on_typing(&self, typing: bool) {
        self.emit(ChatEvent::Typing(typing));
    }

    fn on_error(&self, error: String) {
        self.emit(ChatEvent::Error(error));
    }

    fn on_session_id(&self, session_id: String) {
        self.emit(ChatEvent::SessionId(session_id));
    }
}
