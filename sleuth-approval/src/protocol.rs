use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration, Instant};

use sleuth_core::config::ApprovalConfig;
use sleuth_core::mutation::{
    ApprovalAuditRecord, ApprovalDecision, DecisionChannel, MutationRequest, RiskLevel,
};

use crate::audit::append_audit_record;
use crate::cooldown::{CooldownStatus, CooldownTracker};
use crate::risk::classify_risk;
use crate::ApprovalError;

/// Dispatches the out-of-band approval message (chat, pager, ticket, ...).
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn notify(&self, request: &MutationRequest) -> Result<(), ApprovalError>;
}

/// Asks the operator at the terminal and returns the raw answer line.
#[async_trait]
pub trait InteractivePrompt: Send + Sync {
    async fn ask(&self, request: &MutationRequest, risk: RiskLevel)
        -> Result<String, ApprovalError>;
}

/// Scripted prompt for tests: pops queued answers; once empty it stays
/// pending forever, which models an operator who never responds.
#[derive(Default)]
pub struct QueuedPrompt {
    answers: Mutex<Vec<String>>,
}

impl QueuedPrompt {
    pub fn new(answers: Vec<String>) -> Self {
        Self {
            answers: Mutex::new(answers),
        }
    }
}

#[async_trait]
impl InteractivePrompt for QueuedPrompt {
    async fn ask(
        &self,
        _request: &MutationRequest,
        _risk: RiskLevel,
    ) -> Result<String, ApprovalError> {
        let answer = self.answers.lock().expect("prompt lock").pop();
        match answer {
            Some(answer) => Ok(answer),
            None => std::future::pending().await,
        }
    }
}

/// Reads one answer line from stdin. Used when sleuth runs attached to an
/// operator terminal.
pub struct TerminalPrompt;

#[async_trait]
impl InteractivePrompt for TerminalPrompt {
    async fn ask(
        &self,
        request: &MutationRequest,
        risk: RiskLevel,
    ) -> Result<String, ApprovalError> {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let wording = if risk == RiskLevel::Critical {
            "type 'yes' to approve"
        } else {
            "approve? [y/N]"
        };
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(
                format!(
                    "\n[{risk}] {} on {}\n  {}\n  {wording} > ",
                    request.operation, request.resource, request.description
                )
                .as_bytes(),
            )
            .await?;
        stdout.flush().await?;

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        reader.read_line(&mut line).await?;
        Ok(line)
    }
}

/// On-disk decision shape written by the out-of-band resolver (webhook).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionFile {
    pub mutation_id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

pub fn pending_file(dir: &Path, mutation_id: &str) -> PathBuf {
    dir.join(format!("{mutation_id}_pending.json"))
}

pub fn decision_file(dir: &Path, mutation_id: &str) -> PathBuf {
    dir.join(format!("{mutation_id}.json"))
}

/// A resolved approval request.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub decision: ApprovalDecision,
    pub channel: DecisionChannel,
    pub risk: RiskLevel,
}

impl ApprovalOutcome {
    pub fn approved(&self) -> bool {
        self.decision.approved
    }
}

/// Mediates every state-changing operation. See the crate docs for the
/// channel resolution order.
pub struct ApprovalProtocol {
    config: ApprovalConfig,
    audit_path: PathBuf,
    prompt: Arc<dyn InteractivePrompt>,
    notifier: Option<Arc<dyn ApprovalNotifier>>,
    cooldown: CooldownTracker,
}

impl ApprovalProtocol {
    pub fn new(
        config: ApprovalConfig,
        audit_path: PathBuf,
        prompt: Arc<dyn InteractivePrompt>,
    ) -> Self {
        Self {
            config,
            audit_path,
            prompt,
            notifier: None,
            cooldown: CooldownTracker::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ApprovalNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn check_cooldown(&self, operation: &str) -> CooldownStatus {
        self.cooldown
            .check_cooldown(operation, self.config.cooldown_ms)
    }

    /// Resolve one mutation request. Exactly one audit line is appended per
    /// decision; approved critical-risk mutations start the cooldown clock.
    pub async fn request_approval(
        &self,
        request: &MutationRequest,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        let risk = classify_risk(&request.operation, &request.resource);

        let (decision, channel) = if self.config.auto_approve.contains(&risk) {
            tracing::info!(
                mutation_id = %request.id,
                risk = %risk,
                "mutation auto-approved by policy"
            );
            (ApprovalDecision::approved("auto-policy"), DecisionChannel::Auto)
        } else if self.config.out_of_band && self.notifier.is_some() {
            match self.config.resolved_pending_dir() {
                Some(pending_dir) => {
                    self.resolve_out_of_band(request, risk, &pending_dir).await?
                }
                None => self.resolve_interactive(request, risk).await?,
            }
        } else {
            self.resolve_interactive(request, risk).await?
        };

        let record = ApprovalAuditRecord {
            timestamp: Utc::now(),
            mutation_id: request.id.clone(),
            operation: request.operation.clone(),
            resource: request.resource.clone(),
            risk_level: risk,
            approved: decision.approved,
            approved_by: decision.approved_by.clone(),
            decided_via: channel,
        };
        append_audit_record(&self.audit_path, &record)?;

        if risk == RiskLevel::Critical && decision.approved {
            self.cooldown.record(&request.operation);
        }

        tracing::info!(
            mutation_id = %request.id,
            approved = decision.approved,
            channel = ?channel,
            "approval decision recorded"
        );

        Ok(ApprovalOutcome {
            decision,
            channel,
            risk,
        })
    }

    async fn resolve_interactive(
        &self,
        request: &MutationRequest,
        risk: RiskLevel,
    ) -> Result<(ApprovalDecision, DecisionChannel), ApprovalError> {
        let answer = self.prompt.ask(request, risk).await?;
        Ok((interpret_answer(&answer, risk), DecisionChannel::Interactive))
    }

    /// Write the pending file, dispatch the message, then race the directory
    /// poller against the interactive prompt.
    async fn resolve_out_of_band(
        &self,
        request: &MutationRequest,
        risk: RiskLevel,
        pending_dir: &Path,
    ) -> Result<(ApprovalDecision, DecisionChannel), ApprovalError> {
        let notifier = self
            .notifier
            .as_ref()
            .ok_or_else(|| ApprovalError::ChannelUnavailable("no notifier configured".into()))?;

        tokio::fs::create_dir_all(pending_dir).await?;
        let pending = PendingRequest {
            request: request.clone(),
            risk,
            dispatched_at: Utc::now(),
        };
        let encoded = serde_json::to_vec_pretty(&pending)
            .map_err(|err| ApprovalError::Serde(err.to_string()))?;
        // Pending file exists before the message goes out, so a fast decision
        // always finds its rendezvous.
        tokio::fs::write(pending_file(pending_dir, &request.id), encoded).await?;
        notifier.notify(request).await?;

        tokio::select! {
            resolved = self.poll_for_decision(pending_dir, &request.id) => Ok(resolved),
            answer = self.prompt.ask(request, risk) => {
                let answer = answer?;
                Ok((interpret_answer(&answer, risk), DecisionChannel::Interactive))
            }
        }
    }

    async fn poll_for_decision(
        &self,
        pending_dir: &Path,
        mutation_id: &str,
    ) -> (ApprovalDecision, DecisionChannel) {
        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let path = decision_file(pending_dir, mutation_id);

        loop {
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<DecisionFile>(&bytes) {
                    Ok(file) => {
                        let decision = ApprovalDecision {
                            approved: file.approved,
                            approved_at: Some(file.decided_at),
                            approved_by: file.approved_by,
                            reason: file.reason,
                        };
                        return (decision, DecisionChannel::OutOfBand);
                    }
                    Err(err) => {
                        // Possibly a partial write; keep polling until the
                        // deadline.
                        tracing::warn!(path = %path.display(), error = %err, "unreadable decision file");
                    }
                },
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "transient decision read error");
                }
            }

            if Instant::now() >= deadline {
                return (
                    ApprovalDecision::rejected("timeout"),
                    DecisionChannel::Timeout,
                );
            }
            sleep(poll_interval).await;
        }
    }

    /// Remove pending/decision files older than `max_age_ms`. Returns the
    /// number of files removed.
    pub async fn cleanup_expired_approvals(&self, max_age_ms: u64) -> Result<usize, ApprovalError> {
        let Some(pending_dir) = self.config.resolved_pending_dir() else {
            return Ok(0);
        };
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&pending_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let cutoff = std::time::SystemTime::now() - std::time::Duration::from_millis(max_age_ms);
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            if modified < cutoff {
                if tokio::fs::remove_file(entry.path()).await.is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingRequest {
    request: MutationRequest,
    risk: RiskLevel,
    dispatched_at: DateTime<Utc>,
}

/// Critical risk demands the exact literal `yes`; other risks accept a
/// case-insensitive `y`/`yes`.
fn interpret_answer(answer: &str, risk: RiskLevel) -> ApprovalDecision {
    let trimmed = answer.trim();
    let approved = if risk == RiskLevel::Critical {
        trimmed == "yes"
    } else {
        matches!(trimmed.to_lowercase().as_str(), "y" | "yes")
    };
    if approved {
        ApprovalDecision::approved("operator")
    } else {
        ApprovalDecision::rejected(format!("operator answered '{trimmed}'"))
    }
}
