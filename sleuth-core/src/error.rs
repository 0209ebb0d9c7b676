use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SleuthError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("contract violation: {0}")]
    Contract(#[from] ContractError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("investigation cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing credential for provider {provider}")]
    MissingCredential { provider: String },

    #[error("malformed config: {reason}")]
    Malformed { reason: String },

    #[error("failed to read config file '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum ToolError {
    #[error("tool not found: {tool}")]
    NotFound { tool: String },

    #[error("tool {tool} failed: {message}")]
    ExecutionFailed { tool: String, message: String },

    #[error("tool {tool} transient failure: {message}")]
    Transient { tool: String, message: String },

    #[error("tool {tool} permission denied: {message}")]
    PermissionDenied { tool: String, message: String },

    #[error("tool {tool} timed out after {elapsed:?}")]
    Timeout { tool: String, elapsed: Duration },
}

impl ToolError {
    /// Transient failures may be retried with different parameters; permanent
    /// ones mark the tool at-limit for the rest of the session.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ToolError::Transient { .. } | ToolError::Timeout { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider {provider} unavailable (status {status})")]
    ProviderUnavailable { provider: String, status: u16 },

    #[error("rate limited by {provider}, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Duration,
    },

    #[error("invalid LLM response: {reason}")]
    InvalidResponse { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("unknown hypothesis id: {id}")]
    UnknownHypothesis { id: String },

    #[error("unknown result id: {id}")]
    UnknownResult { id: String },

    #[error("malformed structured output: {reason}")]
    MalformedOutput { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("hypothesis depth {depth} exceeds maximum {max}")]
    DepthBudgetExceeded { depth: u32, max: u32 },

    #[error("iteration budget exhausted after {iterations} iterations")]
    IterationBudgetExceeded { iterations: u32 },

    #[error("operation on pruned hypothesis {id}")]
    PrunedHypothesis { id: String },

    #[error("hypothesis {id} already resolved: {status}")]
    AlreadyResolved { id: String, status: String },

    #[error("approval rejected for mutation {mutation_id}: {reason}")]
    ApprovalRejected {
        mutation_id: String,
        reason: String,
    },

    #[error("approval timed out for mutation {mutation_id}")]
    ApprovalTimeout { mutation_id: String },

    #[error("cooldown active for operation {operation}: {remaining_ms}ms remaining")]
    CooldownActive {
        operation: String,
        remaining_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_serializes_and_formats() {
        let error = ToolError::ExecutionFailed {
            tool: "search_logs".to_string(),
            message: "backend 503".to_string(),
        };
        assert_eq!(error.to_string(), "tool search_logs failed: backend 503");

        let encoded = serde_json::to_string(&error).expect("serialize");
        let decoded: ToolError = serde_json::from_str(&encoded).expect("deserialize");
        match decoded {
            ToolError::ExecutionFailed { tool, message } => {
                assert_eq!(tool, "search_logs");
                assert_eq!(message, "backend 503");
            }
            other => panic!("expected execution failure, got {other:?}"),
        }
    }

    #[test]
    fn transient_classification() {
        assert!(ToolError::Transient {
            tool: "t".into(),
            message: "503".into()
        }
        .is_transient());
        assert!(!ToolError::PermissionDenied {
            tool: "t".into(),
            message: "401".into()
        }
        .is_transient());
    }
}
