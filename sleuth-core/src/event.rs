use serde::{Deserialize, Serialize};

/// Phase of the investigation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Triage,
    Hypothesize,
    Investigate,
    Evaluate,
    Conclude,
    Remediate,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Triage => "triage",
            Phase::Hypothesize => "hypothesize",
            Phase::Investigate => "investigate",
            Phase::Evaluate => "evaluate",
            Phase::Conclude => "conclude",
            Phase::Remediate => "remediate",
        };
        write!(f, "{s}")
    }
}

/// Events yielded by the state machine over a bounded channel. `Done` and
/// `Cancelled` are terminal; consumers poll until one arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvestigationEvent {
    Thinking {
        text: String,
    },
    KnowledgeRetrieved {
        runbooks: usize,
        postmortems: usize,
        known_issues: usize,
    },
    PhaseTransition {
        from: Phase,
        to: Phase,
    },
    ToolStart {
        tool: String,
        args: serde_json::Value,
    },
    ToolEnd {
        tool: String,
        result_id: String,
        duration_ms: u64,
    },
    ToolError {
        tool: String,
        error: String,
    },
    ToolLimit {
        tool: String,
        warning: String,
    },
    ContextCleared {
        cleared: usize,
    },
    AnswerStart,
    Done {
        answer: String,
        investigation_id: String,
    },
    Cancelled {
        investigation_id: String,
    },
}

impl InvestigationEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvestigationEvent::Done { .. } | InvestigationEvent::Cancelled { .. }
        )
    }
}
