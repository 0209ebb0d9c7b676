use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use sleuth_approval::signature::verify_signature;
use sleuth_approval::{decision_file, pending_file, DecisionFile};

use crate::state::WebhookState;

const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const SIGNATURE_HEADER: &str = "x-slack-signature";

/// Form-encoded body with a `payload` field containing JSON.
#[derive(Debug, Deserialize)]
struct InteractionForm {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct InteractionPayload {
    #[serde(default)]
    actions: Vec<InteractionAction>,
    #[serde(default)]
    user: Option<InteractionUser>,
}

#[derive(Debug, Deserialize)]
struct InteractionAction {
    action_id: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct InteractionUser {
    #[serde(default)]
    username: Option<String>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

/// GET /health
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now(),
    }))
}

/// POST /slack/interactions: verify the signature, then materialize the
/// operator's decision for the approval poller.
pub async fn interactions_handler(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(secret) = state.signing_secret() else {
        return error_response(StatusCode::UNAUTHORIZED, "signing secret not configured");
    };

    let timestamp = header_str(&headers, TIMESTAMP_HEADER);
    let presented = header_str(&headers, SIGNATURE_HEADER);
    let (Some(timestamp), Some(presented)) = (timestamp, presented) else {
        return error_response(StatusCode::UNAUTHORIZED, "missing signature headers");
    };

    if !verify_signature(secret, timestamp, &body, presented, Utc::now().timestamp()) {
        tracing::warn!("interactive payload failed signature verification");
        return error_response(StatusCode::UNAUTHORIZED, "signature verification failed");
    }

    let form: InteractionForm = match serde_urlencoded::from_str(&body) {
        Ok(form) => form,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("malformed form body: {err}"));
        }
    };
    let payload: InteractionPayload = match serde_json::from_str(&form.payload) {
        Ok(payload) => payload,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("malformed payload: {err}"));
        }
    };

    let Some(action) = payload.actions.first() else {
        return error_response(StatusCode::BAD_REQUEST, "payload carries no actions");
    };
    let approved = match action.action_id.as_str() {
        "approve_mutation" => true,
        "reject_mutation" => false,
        other => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("unknown action_id '{other}'"),
            );
        }
    };
    let mutation_id = action.value.clone();
    let approved_by = payload.user.and_then(|u| u.username);

    let decision = DecisionFile {
        mutation_id: mutation_id.clone(),
        approved,
        approved_by: approved_by.clone(),
        reason: (!approved).then(|| "rejected via interactive message".to_string()),
        decided_at: Utc::now(),
    };

    let encoded = match serde_json::to_vec_pretty(&decision) {
        Ok(encoded) => encoded,
        Err(err) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("failed to encode decision: {err}"),
            );
        }
    };
    if let Err(err) = tokio::fs::create_dir_all(state.pending_dir()).await {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed to create pending dir: {err}"),
        );
    }
    if let Err(err) =
        tokio::fs::write(decision_file(state.pending_dir(), &mutation_id), encoded).await
    {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed to write decision: {err}"),
        );
    }
    // The request has been answered; its pending marker is no longer needed.
    let _ = tokio::fs::remove_file(pending_file(state.pending_dir(), &mutation_id)).await;

    tracing::info!(%mutation_id, approved, by = ?approved_by, "out-of-band decision recorded");

    (
        StatusCode::OK,
        Json(serde_json::json!({"ok": true, "mutation_id": mutation_id})),
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_approval::signature::compute_signature;

    fn signed_request(
        secret: &str,
        mutation_id: &str,
        action_id: &str,
    ) -> (HeaderMap, String) {
        let payload = serde_json::json!({
            "actions": [{"action_id": action_id, "value": mutation_id}],
            "user": {"username": "oncall"}
        });
        let body =
            serde_urlencoded::to_string([("payload", payload.to_string())]).unwrap();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = compute_signature(secret, &timestamp, &body);

        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, timestamp.parse().unwrap());
        headers.insert(SIGNATURE_HEADER, signature.parse().unwrap());
        (headers, body)
    }

    #[tokio::test]
    async fn valid_approval_writes_decision_and_clears_pending() {
        let dir = tempfile::tempdir().unwrap();
        let state = WebhookState::new(Some("secret".into()), dir.path().to_path_buf());
        tokio::fs::write(pending_file(dir.path(), "m1"), b"{}")
            .await
            .unwrap();

        let (headers, body) = signed_request("secret", "m1", "approve_mutation");
        let response = interactions_handler(State(state), headers, body).await;
        assert_eq!(response.status(), StatusCode::OK);

        let decision_path = decision_file(dir.path(), "m1");
        let decision: DecisionFile =
            serde_json::from_slice(&tokio::fs::read(&decision_path).await.unwrap()).unwrap();
        assert!(decision.approved);
        assert_eq!(decision.approved_by.as_deref(), Some("oncall"));
        assert!(!pending_file(dir.path(), "m1").exists());
    }

    #[tokio::test]
    async fn rejection_records_a_reason() {
        let dir = tempfile::tempdir().unwrap();
        let state = WebhookState::new(Some("secret".into()), dir.path().to_path_buf());

        let (headers, body) = signed_request("secret", "m2", "reject_mutation");
        let response = interactions_handler(State(state), headers, body).await;
        assert_eq!(response.status(), StatusCode::OK);

        let decision: DecisionFile = serde_json::from_slice(
            &tokio::fs::read(decision_file(dir.path(), "m2")).await.unwrap(),
        )
        .unwrap();
        assert!(!decision.approved);
        assert!(decision.reason.is_some());
    }

    #[tokio::test]
    async fn wrong_secret_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let state = WebhookState::new(Some("secret".into()), dir.path().to_path_buf());

        let (headers, body) = signed_request("other-secret", "m3", "approve_mutation");
        let response = interactions_handler(State(state), headers, body).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!decision_file(dir.path(), "m3").exists());
    }

    #[tokio::test]
    async fn missing_secret_disables_the_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let state = WebhookState::new(None, dir.path().to_path_buf());

        let (headers, body) = signed_request("secret", "m4", "approve_mutation");
        let response = interactions_handler(State(state), headers, body).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_payload_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = WebhookState::new(Some("secret".into()), dir.path().to_path_buf());

        let body = serde_urlencoded::to_string([("payload", "{not json")]).unwrap();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = compute_signature("secret", &timestamp, &body);
        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, timestamp.parse().unwrap());
        headers.insert(SIGNATURE_HEADER, signature.parse().unwrap());

        let response = interactions_handler(State(state), headers, body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = health_handler().await;
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
    }
}
