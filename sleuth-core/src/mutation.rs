use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk class of a state-changing operation, classified lexically from the
/// operation and resource names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A proposed state-changing operation awaiting approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
    pub id: String,
    pub operation: String,
    pub resource: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_impact: Option<String>,
}

/// The outcome of an approval request. Written to the audit log; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalDecision {
    pub fn approved(by: impl Into<String>) -> Self {
        Self {
            approved: true,
            approved_at: Some(Utc::now()),
            approved_by: Some(by.into()),
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            approved_at: Some(Utc::now()),
            approved_by: None,
            reason: Some(reason.into()),
        }
    }
}

/// Which resolver produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionChannel {
    Auto,
    Interactive,
    OutOfBand,
    Timeout,
}

/// One line of `approvals.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalAuditRecord {
    pub timestamp: DateTime<Utc>,
    pub mutation_id: String,
    pub operation: String,
    pub resource: String,
    pub risk_level: RiskLevel,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    pub decided_via: DecisionChannel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_order_by_severity() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn risk_level_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RiskLevel::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn decision_constructors() {
        let yes = ApprovalDecision::approved("operator");
        assert!(yes.approved);
        assert_eq!(yes.approved_by.as_deref(), Some("operator"));

        let no = ApprovalDecision::rejected("timeout");
        assert!(!no.approved);
        assert_eq!(no.reason.as_deref(), Some("timeout"));
    }
}
