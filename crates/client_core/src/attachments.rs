use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use shared::domain::ConnectionTarget;
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

const UPLOAD_PATH: &str = "/api/upload";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedFile {
    pub url: String,
}

#[async_trait]
pub trait UploadGateway: Send + Sync {
    async fn upload_file(
        &self,
        target: &ConnectionTarget,
        local_uri: &str,
        name: &str,
        mime_type: &str,
    ) -> Result<UploadedFile, UploadError>;

    /// Absolute URL for a server-relative media path.
    fn media_url(&self, target: &ConnectionTarget, relative_url: &str) -> String;
}

#[derive(Clone, Default)]
pub struct HttpUploadGateway {
    http: Client,
}

impl HttpUploadGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UploadGateway for HttpUploadGateway {
    async fn upload_file(
        &self,
        target: &ConnectionTarget,
        local_uri: &str,
        name: &str,
        mime_type: &str,
    ) -> Result<UploadedFile, UploadError> {
        if !target.is_configured() {
            return Err(UploadError::Rejected("no server configured".to_string()));
        }

        let path = local_uri.strip_prefix("file://").unwrap_or(local_uri);
        let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
            path: path.to_string(),
            source,
        })?;
        let size_bytes = bytes.len();

        let mut request = self
            .http
            .post(format!("{}{UPLOAD_PATH}", target.base_url()))
            .query(&[("filename", name), ("mime_type", mime_type)])
            .body(bytes);
        if target.is_authenticated() {
            request = request.bearer_auth(&target.token);
        }

        let uploaded: UploadedFile = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if uploaded.url.is_empty() {
            return Err(UploadError::Rejected(
                "server returned no file url".to_string(),
            ));
        }

        debug!(%name, size_bytes, url = %uploaded.url, "upload finished");
        Ok(uploaded)
    }

    fn media_url(&self, target: &ConnectionTarget, relative_url: &str) -> String {
        if relative_url.starts_with("http://") || relative_url.starts_with("https://") {
            return relative_url.to_string();
        }
        format!(
            "{}/{}",
            target.base_url(),
            relative_url.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    pub id: AttachmentId,
    pub local_uri: String,
    pub name: String,
    pub mime_type: String,
    pub server_url: Option<String>,
    pub uploading: bool,
    pub error: Option<String>,
}

impl PendingAttachment {
    /// Uploaded successfully and not in error.
    pub fn is_ready(&self) -> bool {
        self.server_url.is_some() && !self.uploading && self.error.is_none()
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Handle to a started upload. Awaiting `task` waits until the record has
/// been updated.
#[derive(Debug)]
pub struct UploadTicket {
    pub id: AttachmentId,
    pub task: JoinHandle<()>,
}

struct TrackerState {
    target: ConnectionTarget,
    items: Vec<PendingAttachment>,
}

/// Attachments staged for the next outgoing message.
pub struct AttachmentTracker {
    gateway: Arc<dyn UploadGateway>,
    state: Arc<Mutex<TrackerState>>,
    next_id: AtomicU64,
}

impl AttachmentTracker {
    pub fn new(gateway: Arc<dyn UploadGateway>, target: ConnectionTarget) -> Self {
        Self {
            gateway,
            state: Arc::new(Mutex::new(TrackerState {
                target,
                items: Vec::new(),
            })),
            next_id: AtomicU64::new(0),
        }
    }

    /// Server later uploads and media links resolve against.
    pub async fn set_target(&self, target: ConnectionTarget) {
        self.state.lock().await.target = target;
    }

    /// Appends a record in the uploading state and starts its upload.
    pub async fn add(
        &self,
        local_uri: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> UploadTicket {
        let id = AttachmentId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let record = PendingAttachment {
            id,
            local_uri: local_uri.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            server_url: None,
            uploading: true,
            error: None,
        };

        let target = {
            let mut state = self.state.lock().await;
            state.items.push(record.clone());
            state.target.clone()
        };
        info!(id = id.0, name = %record.name, mime_type = %record.mime_type, "upload started");

        let gateway = Arc::clone(&self.gateway);
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let result = gateway
                .upload_file(&target, &record.local_uri, &record.name, &record.mime_type)
                .await;

            let mut state = state.lock().await;
            let Some(entry) = state.items.iter_mut().find(|entry| entry.id == id) else {
                debug!(id = id.0, "upload finished for removed attachment");
                return;
            };
            entry.uploading = false;
            match result {
                Ok(uploaded) => entry.server_url = Some(uploaded.url),
                Err(err) => {
                    warn!(id = id.0, error = %err, "upload failed");
                    entry.error = Some(err.to_string());
                }
            }
        });

        UploadTicket { id, task }
    }

    /// Removes the attachment at `index`; an upload still running for it
    /// completes without effect.
    pub async fn remove(&self, index: usize) -> Option<PendingAttachment> {
        let mut state = self.state.lock().await;
        (index < state.items.len()).then(|| state.items.remove(index))
    }

    pub async fn snapshot(&self) -> Vec<PendingAttachment> {
        self.state.lock().await.items.clone()
    }

    pub async fn clear(&self) {
        self.state.lock().await.items.clear();
    }

    pub async fn has_ready(&self) -> bool {
        self.state
            .lock()
            .await
            .items
            .iter()
            .any(PendingAttachment::is_ready)
    }

    /// `text` followed by one link per ready attachment, in list order.
    pub async fn compose_content(&self, text: &str) -> String {
        let state = self.state.lock().await;
        compose(text, &state.items, |relative| {
            self.gateway.media_url(&state.target, relative)
        })
    }
}

fn compose(
    text: &str,
    attachments: &[PendingAttachment],
    media_url: impl Fn(&str) -> String,
) -> String {
    let links = attachments
        .iter()
        .filter(|attachment| attachment.is_ready())
        .filter_map(|attachment| {
            let url = media_url(attachment.server_url.as_deref()?);
            Some(if attachment.is_image() {
                format!("![image]({url})")
            } else {
                format!("[{}]({url})", attachment.name)
            })
        })
        .collect::<Vec<_>>()
        .join("\n");

    match (text.is_empty(), links.is_empty()) {
        (_, true) => text.to_string(),
        (true, false) => links,
        (false, false) => format!("{text}\n{links}"),
    }
}

#[cfg(test)]
#[path = "tests/attachments_tests.rs"]
mod tests;
