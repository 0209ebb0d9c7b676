use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared state for the webhook HTTP layer.
#[derive(Clone)]
pub struct WebhookState {
    inner: Arc<WebhookStateInner>,
}

struct WebhookStateInner {
    /// Signing secret for interactive payloads. Absent means the provider is
    /// disabled; all posts are rejected.
    signing_secret: Option<String>,
    /// Rendezvous directory shared with the approval protocol.
    pending_dir: PathBuf,
}

impl WebhookState {
    pub fn new(signing_secret: Option<String>, pending_dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(WebhookStateInner {
                signing_secret,
                pending_dir,
            }),
        }
    }

    pub fn signing_secret(&self) -> Option<&str> {
        self.inner.signing_secret.as_deref()
    }

    pub fn pending_dir(&self) -> &Path {
        &self.inner.pending_dir
    }
}
