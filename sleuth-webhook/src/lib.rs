//! HTTP receiver for out-of-band approval decisions.
//!
//! Verifies the signed interactive payload (HMAC-SHA256 over
//! `"v0:{ts}:{body}"`, 300-second freshness) and materializes the operator's
//! decision as a `{mutation_id}.json` file that the approval protocol's
//! poller picks up.

mod handlers;
mod router;
mod state;

pub use handlers::{health_handler, interactions_handler};
pub use router::webhook_router;
pub use state::WebhookState;

use std::net::SocketAddr;

/// Bind and serve the webhook on the configured port until the task is
/// dropped.
pub async fn serve(state: WebhookState, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "webhook listening");
    axum::serve(listener, webhook_router(state)).await
}
