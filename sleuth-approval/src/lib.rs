//! Mutation approval: every state-changing operation passes through here.
//!
//! Risk is classified lexically from the operation and resource names. A
//! request is then resolved by the first applicable channel: auto-approval
//! policy, an out-of-band file rendezvous raced against the interactive
//! prompt, or the interactive prompt alone. Every decision is appended to
//! `approvals.jsonl`; critical-risk mutations feed a per-operation cooldown.

mod audit;
mod cooldown;
mod protocol;
mod risk;
pub mod signature;

pub use audit::{append_audit_record, read_audit_records};
pub use cooldown::{CooldownStatus, CooldownTracker};
pub use protocol::{
    decision_file, pending_file, ApprovalNotifier, ApprovalOutcome, ApprovalProtocol,
    DecisionFile, InteractivePrompt, QueuedPrompt, TerminalPrompt,
};
pub use risk::classify_risk;

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("out-of-band channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("interactive prompt failed: {0}")]
    PromptFailed(String),

    #[error("failed to encode decision: {0}")]
    Serde(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
