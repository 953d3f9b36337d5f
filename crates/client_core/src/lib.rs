pub mod attachments;
pub mod connection;
pub mod events;
pub mod session;
pub mod transport;

pub use attachments::{
    AttachmentId, AttachmentTracker, HttpUploadGateway, PendingAttachment, UploadError,
    UploadGateway, UploadTicket, UploadedFile,
};
pub use connection::{endpoint_for, ConnectionManager, ReconnectPolicy, UNAUTHORIZED_MESSAGE};
pub use events::{ChatEvent, ChatEvents, ConnectionCallbacks, EventQueue};
pub use session::{trim_history, ChatSession, MAX_HISTORY};
pub use transport::{Transport, TransportError, TransportEvent, TransportLink, WebSocketTransport};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
