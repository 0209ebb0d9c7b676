use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mutation::RiskLevel;

/// Top-level sleuth configuration loaded from TOML. Every section has
/// serviceable defaults so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SleuthConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub investigation: InvestigationConfig,
    #[serde(default)]
    pub scratchpad: ScratchpadConfig,
    #[serde(default)]
    pub compactor: CompactorConfig,
    #[serde(default)]
    pub hypothesis: HypothesisConfig,
    #[serde(default)]
    pub infra: InfraConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl SleuthConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|err| ConfigError::Malformed {
            reason: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Root for scratchpad logs, investigation memory and approval state.
    pub data_dir: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./sleuth-data"),
        }
    }
}

impl GlobalConfig {
    pub fn investigations_dir(&self) -> PathBuf {
        self.data_dir.join("investigations")
    }

    pub fn scratchpad_dir(&self) -> PathBuf {
        self.data_dir.join("scratchpad")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("audit")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_triage_iterations")]
    pub max_triage_iterations: u32,
    /// Queries executed per frontier hypothesis per INVESTIGATE pass.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    /// Scratchpad token estimate above which compaction runs.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_token_threshold: usize,
    /// Per tool call, not per iteration.
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
}

fn default_max_iterations() -> u32 {
    15
}
fn default_max_triage_iterations() -> u32 {
    2
}
fn default_max_queries() -> usize {
    5
}
fn default_compaction_threshold() -> usize {
    24_000
}
fn default_tool_timeout_ms() -> u64 {
    30_000
}

impl Default for InvestigationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_triage_iterations: default_max_triage_iterations(),
            max_queries: default_max_queries(),
            compaction_token_threshold: default_compaction_threshold(),
            tool_timeout_ms: default_tool_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchpadConfig {
    /// Soft per-tool call cap. Exceeding it warns, never blocks.
    #[serde(default = "default_tool_soft_cap")]
    pub tool_soft_cap: usize,
    /// Jaccard similarity above which a repeated query warns.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_warning_threshold: f64,
}

fn default_tool_soft_cap() -> usize {
    5
}
fn default_similarity_threshold() -> f64 {
    0.8
}

impl Default for ScratchpadConfig {
    fn default() -> Self {
        Self {
            tool_soft_cap: default_tool_soft_cap(),
            similarity_warning_threshold: default_similarity_threshold(),
        }
    }
}

/// Weights for the six importance-scoring axes. Each axis yields [0,1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompactorWeights {
    pub recency: f64,
    pub query_relevance: f64,
    pub error_signals: f64,
    pub hypothesis_relevance: f64,
    pub service_relevance: f64,
    pub cited_in_notes: f64,
}

impl Default for CompactorWeights {
    fn default() -> Self {
        Self {
            recency: 0.20,
            query_relevance: 0.20,
            error_signals: 0.20,
            hypothesis_relevance: 0.15,
            service_relevance: 0.10,
            cited_in_notes: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactorConfig {
    #[serde(default)]
    pub weights: CompactorWeights,
    #[serde(default = "default_max_full_results")]
    pub max_full_results: usize,
    #[serde(default = "default_max_compact_results")]
    pub max_compact_results: usize,
    #[serde(default = "default_min_score_for_full")]
    pub min_score_for_full: f64,
    #[serde(default = "default_min_score_to_keep")]
    pub min_score_to_keep: f64,
    /// When set, the plan is produced greedily against this token budget
    /// instead of the count limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<usize>,
}

fn default_max_full_results() -> usize {
    5
}
fn default_max_compact_results() -> usize {
    10
}
fn default_min_score_for_full() -> f64 {
    0.5
}
fn default_min_score_to_keep() -> f64 {
    0.2
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl CompactorConfig {
    /// Default weighting.
    pub fn balanced() -> Self {
        Self {
            weights: CompactorWeights::default(),
            max_full_results: default_max_full_results(),
            max_compact_results: default_max_compact_results(),
            min_score_for_full: default_min_score_for_full(),
            min_score_to_keep: default_min_score_to_keep(),
            token_budget: None,
        }
    }

    /// Tilted towards error signals and hypothesis relevance.
    pub fn incident() -> Self {
        Self {
            weights: CompactorWeights {
                recency: 0.15,
                query_relevance: 0.10,
                error_signals: 0.30,
                hypothesis_relevance: 0.25,
                service_relevance: 0.10,
                cited_in_notes: 0.10,
            },
            ..Self::balanced()
        }
    }

    /// Tilted towards query relevance and recency.
    pub fn research() -> Self {
        Self {
            weights: CompactorWeights {
                recency: 0.30,
                query_relevance: 0.30,
                error_signals: 0.10,
                hypothesis_relevance: 0.10,
                service_relevance: 0.10,
                cited_in_notes: 0.10,
            },
            ..Self::balanced()
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "incident" => Some(Self::incident()),
            "research" => Some(Self::research()),
            "balanced" => Some(Self::balanced()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Children generated when branching a confirmed-direction hypothesis.
    #[serde(default = "default_max_branches")]
    pub max_branches: usize,
}

fn default_max_depth() -> u32 {
    5
}
fn default_max_branches() -> usize {
    3
}

impl Default for HypothesisConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_branches: default_max_branches(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,
    /// Provider inventory kinds fanned out per region.
    #[serde(default = "default_service_kinds")]
    pub service_kinds: Vec<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_timeout_per_service_ms")]
    pub timeout_per_service_ms: u64,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

fn default_regions() -> Vec<String> {
    vec![std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string())]
}
fn default_service_kinds() -> Vec<String> {
    ["compute", "database", "cache", "queue", "loadbalancer"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_concurrency() -> usize {
    4
}
fn default_timeout_per_service_ms() -> u64 {
    10_000
}
fn default_cache_ttl_ms() -> u64 {
    60_000
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            regions: default_regions(),
            service_kinds: default_service_kinds(),
            max_concurrency: default_max_concurrency(),
            timeout_per_service_ms: default_timeout_per_service_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_max_runbooks")]
    pub max_runbooks: usize,
    #[serde(default = "default_max_postmortems")]
    pub max_postmortems: usize,
    #[serde(default = "default_max_known_issues")]
    pub max_known_issues: usize,
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,
}

fn default_max_runbooks() -> usize {
    3
}
fn default_max_postmortems() -> usize {
    2
}
fn default_max_known_issues() -> usize {
    3
}
fn default_min_relevance() -> f64 {
    0.3
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_runbooks: default_max_runbooks(),
            max_postmortems: default_max_postmortems(),
            max_known_issues: default_max_known_issues(),
            min_relevance: default_min_relevance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Risk levels approved without asking.
    #[serde(default)]
    pub auto_approve: Vec<RiskLevel>,
    /// Enables the out-of-band file-polling channel.
    #[serde(default)]
    pub out_of_band: bool,
    /// Pending-file rendezvous directory. Falls back to `PENDING_DIR`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_dir: Option<PathBuf>,
    #[serde(default = "default_approval_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Minimum interval between critical-risk mutations of the same operation.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_approval_timeout_ms() -> u64 {
    300_000
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_cooldown_ms() -> u64 {
    600_000
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_approve: Vec::new(),
            out_of_band: false,
            pending_dir: env_path("PENDING_DIR"),
            timeout_ms: default_approval_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl ApprovalConfig {
    pub fn resolved_pending_dir(&self) -> Option<PathBuf> {
        self.pending_dir.clone().or_else(|| env_path("PENDING_DIR"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    /// Signing secret for interactive payloads. Absent disables verification
    /// entirely (the endpoint then rejects all posts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
}

fn default_webhook_port() -> u16 {
    std::env::var("WEBHOOK_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000)
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            port: default_webhook_port(),
            signing_secret: None,
        }
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name).ok().map(PathBuf::from)
}

/// Provider credentials scanned from the environment. A missing key is a
/// non-error that disables the corresponding provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    keys: HashMap<String, String>,
}

impl ProviderCredentials {
    /// Collect every `*_API_KEY` and `*_SIGNING_SECRET` variable.
    pub fn from_env() -> Self {
        let mut keys = HashMap::new();
        for (name, value) in std::env::vars() {
            if name.ends_with("_API_KEY") || name.ends_with("_SIGNING_SECRET") {
                keys.insert(name, value);
            }
        }
        Self { keys }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.keys.get(name).map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.keys.contains_key(name)
    }
}
