//! Durable, append-only record of every investigation action, paired with a
//! tiered in-memory index of tool results.
//!
//! The on-disk log is JSONL, one serde-tagged entry per line, never mutated.
//! Cleared results stay retrievable by id from the in-memory archive for the
//! lifetime of the investigation; reload-on-start replays the log and
//! rebuilds every tier as full (compaction re-runs lazily).

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sleuth_core::config::ScratchpadConfig;
use sleuth_core::error::{ContractError, SleuthError};
use sleuth_core::event::Phase;

use crate::compactor::CompactionPlan;
use crate::summarizer::{summarize, CompactSummary};

/// One line of the on-disk log. Readers ignore unknown types and fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScratchpadEntry {
    Init {
        timestamp: DateTime<Utc>,
        session_id: String,
        query: String,
    },
    Thinking {
        timestamp: DateTime<Utc>,
        text: String,
    },
    ToolResult {
        timestamp: DateTime<Utc>,
        result_id: String,
        tool: String,
        args: serde_json::Value,
        result: serde_json::Value,
        duration_ms: u64,
    },
    PhaseTransition {
        timestamp: DateTime<Utc>,
        from: Phase,
        to: Phase,
    },
    #[serde(other)]
    Unknown,
}

/// Context-residency state of a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Full,
    Compact,
    Cleared,
}

/// An archived tool result. Immutable after append.
#[derive(Debug, Clone)]
pub struct StoredResult {
    pub result_id: String,
    pub tool: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub summary: CompactSummary,
}

/// Result of a soft-cap consultation. `allowed` is always true.
#[derive(Debug, Clone)]
pub struct ToolCallCheck {
    pub allowed: bool,
    pub warning: Option<String>,
}

pub struct Scratchpad {
    log_path: PathBuf,
    config: ScratchpadConfig,
    results: Vec<StoredResult>,
    index: HashMap<String, usize>,
    tiers: HashMap<String, Tier>,
    tool_usage: HashMap<String, usize>,
    tool_queries: HashMap<String, Vec<String>>,
    last_io_error: Option<String>,
}

impl Scratchpad {
    pub fn new(log_path: PathBuf, config: ScratchpadConfig) -> Self {
        Self {
            log_path,
            config,
            results: Vec::new(),
            index: HashMap::new(),
            tiers: HashMap::new(),
            tool_usage: HashMap::new(),
            tool_queries: HashMap::new(),
            last_io_error: None,
        }
    }

    /// Replay an existing log. Tool results come back at tier `Full`;
    /// malformed lines are skipped with a warning.
    pub fn reload(log_path: PathBuf, config: ScratchpadConfig) -> Result<Self, SleuthError> {
        let mut scratchpad = Self::new(log_path.clone(), config);
        let file = fs::File::open(&log_path)?;
        let reader = BufReader::new(file);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ScratchpadEntry>(&line) {
                Ok(ScratchpadEntry::ToolResult {
                    timestamp,
                    result_id,
                    tool,
                    args,
                    result,
                    duration_ms,
                }) => {
                    let summary = summarize(&result_id, &tool, &args, &result);
                    scratchpad.insert_result(StoredResult {
                        result_id,
                        tool,
                        args,
                        result,
                        duration_ms,
                        timestamp,
                        summary,
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        path = %log_path.display(),
                        error = %err,
                        "skipping malformed scratchpad line"
                    );
                }
            }
        }
        Ok(scratchpad)
    }

    /// Append a typed entry to the on-disk log. Write failures are recorded
    /// (see [`Self::take_last_io_error`]) without losing in-memory state.
    pub fn append(&mut self, entry: &ScratchpadEntry) {
        if let Err(err) = self.write_line(entry) {
            tracing::warn!(error = %err, "scratchpad log append failed");
            self.last_io_error = Some(err.to_string());
        }
    }

    fn write_line(&self, entry: &ScratchpadEntry) -> std::io::Result<()> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        let line = serde_json::to_string(entry)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    }

    pub fn record_init(&mut self, session_id: &str, query: &str) {
        self.append(&ScratchpadEntry::Init {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            query: query.to_string(),
        });
    }

    pub fn record_thinking(&mut self, text: &str) {
        self.append(&ScratchpadEntry::Thinking {
            timestamp: Utc::now(),
            text: text.to_string(),
        });
    }

    pub fn record_phase_transition(&mut self, from: Phase, to: Phase) {
        self.append(&ScratchpadEntry::PhaseTransition {
            timestamp: Utc::now(),
            from,
            to,
        });
    }

    /// Consult the soft cap before calling `tool`. Never blocks; registers
    /// the attempt so repeated consultations count against the cap.
    pub fn can_call_tool(&mut self, tool: &str, query: Option<&str>) -> ToolCallCheck {
        let cap = self.config.tool_soft_cap;
        let calls = *self.tool_usage.get(tool).unwrap_or(&0);

        let mut warning = None;
        if calls >= cap {
            warning = Some(format!(
                "tool {tool} has used {cap}/{cap} suggested calls; prefer a different angle"
            ));
        } else if calls + 1 == cap {
            warning = Some(format!(
                "tool {tool} is approaching its soft cap ({}/{cap} calls used)",
                calls + 1
            ));
        }

        if let Some(query) = query {
            let threshold = self.config.similarity_warning_threshold;
            let previous = self.tool_queries.entry(tool.to_string()).or_default();
            if warning.is_none() {
                let repeated = previous
                    .iter()
                    .any(|prior| jaccard_similarity(prior, query) >= threshold);
                if repeated {
                    warning = Some(format!(
                        "tool {tool} was already queried with nearly identical parameters"
                    ));
                }
            }
            previous.push(query.to_string());
        }

        *self.tool_usage.entry(tool.to_string()).or_insert(0) += 1;

        ToolCallCheck {
            allowed: true,
            warning,
        }
    }

    /// Append a tool result: assigns a stable result id, records tier full,
    /// produces the compact summary, writes the log line.
    pub fn append_tool_result(
        &mut self,
        tool: &str,
        args: serde_json::Value,
        result: serde_json::Value,
        duration_ms: u64,
    ) -> String {
        let result_id = format!("tr_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let timestamp = Utc::now();

        self.append(&ScratchpadEntry::ToolResult {
            timestamp,
            result_id: result_id.clone(),
            tool: tool.to_string(),
            args: args.clone(),
            result: result.clone(),
            duration_ms,
        });

        let summary = summarize(&result_id, tool, &args, &result);
        self.insert_result(StoredResult {
            result_id: result_id.clone(),
            tool: tool.to_string(),
            args,
            result,
            duration_ms,
            timestamp,
            summary,
        });
        result_id
    }

    fn insert_result(&mut self, stored: StoredResult) {
        let id = stored.result_id.clone();
        self.index.insert(id.clone(), self.results.len());
        self.tiers.insert(id, Tier::Full);
        self.results.push(stored);
    }

    /// Move results to the tiers assigned by the plan. Unknown ids in the
    /// plan are ignored. Returns the number of newly cleared results.
    pub fn apply_compaction_plan(&mut self, plan: &CompactionPlan) -> usize {
        let mut newly_cleared = 0;
        for id in &plan.keep_full {
            if self.index.contains_key(id) {
                self.tiers.insert(id.clone(), Tier::Full);
            }
        }
        for id in &plan.compact {
            if self.index.contains_key(id) {
                self.tiers.insert(id.clone(), Tier::Compact);
            }
        }
        for id in &plan.clear {
            if let Some(tier) = self.tiers.get_mut(id) {
                if *tier != Tier::Cleared {
                    newly_cleared += 1;
                }
                *tier = Tier::Cleared;
            }
        }
        tracing::debug!(
            full = plan.keep_full.len(),
            compact = plan.compact.len(),
            cleared = plan.clear.len(),
            "compaction plan applied"
        );
        newly_cleared
    }

    /// Retrieve the archived full result regardless of tier.
    pub fn get_result_by_id(&self, id: &str) -> Result<&StoredResult, ContractError> {
        self.index
            .get(id)
            .map(|&idx| &self.results[idx])
            .ok_or_else(|| ContractError::UnknownResult { id: id.to_string() })
    }

    pub fn tier_of(&self, id: &str) -> Option<Tier> {
        self.tiers.get(id).copied()
    }

    pub fn results(&self) -> &[StoredResult] {
        &self.results
    }

    /// Rough token estimate for the tiered context (chars / 4).
    pub fn token_estimate(&self) -> usize {
        let chars: usize = self
            .results
            .iter()
            .map(|r| match self.tiers.get(&r.result_id) {
                Some(Tier::Full) | None => r.result.to_string().len() + r.args.to_string().len(),
                Some(Tier::Compact) => r.summary.short_text.len(),
                Some(Tier::Cleared) => 24,
            })
            .sum();
        chars / 4
    }

    /// Render the tiered context: full results verbatim, compact results as
    /// one-line summaries, cleared results as a count plus retrieval hint.
    pub fn build_tiered_context(&self) -> String {
        let mut full_sections = Vec::new();
        let mut compact_lines = Vec::new();
        let mut cleared = 0usize;

        for result in &self.results {
            match self.tiers.get(&result.result_id).copied().unwrap_or(Tier::Full) {
                Tier::Full => full_sections.push(format!(
                    "[{}] {} (args: {})\n{}",
                    result.result_id, result.tool, result.args, result.result
                )),
                Tier::Compact => compact_lines.push(format!(
                    "- [{}] {}",
                    result.result_id, result.summary.short_text
                )),
                Tier::Cleared => cleared += 1,
            }
        }

        let mut out = String::new();
        if !full_sections.is_empty() {
            out.push_str("## Tool results\n");
            out.push_str(&full_sections.join("\n\n"));
            out.push('\n');
        }
        if !compact_lines.is_empty() {
            out.push_str("\n## Summarized results\n");
            out.push_str(&compact_lines.join("\n"));
            out.push('\n');
        }
        if cleared > 0 {
            out.push_str(&format!(
                "\n{cleared} older results were cleared from context; retrieve any of them by result id with the get_archived_result tool if needed.\n"
            ));
        }
        out
    }

    /// The last log-write failure, if any, clearing it.
    pub fn take_last_io_error(&mut self) -> Option<String> {
        self.last_io_error.take()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// Jaccard similarity of whitespace token sets.
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratchpad(dir: &Path) -> Scratchpad {
        Scratchpad::new(dir.join("scratchpad.jsonl"), ScratchpadConfig::default())
    }

    #[test]
    fn log_and_memory_agree_on_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut pad = scratchpad(dir.path());
        pad.record_init("sess-1", "why is checkout slow");

        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(pad.append_tool_result(
                "search_logs",
                serde_json::json!({"q": format!("query {i}")}),
                serde_json::json!({"lines": [i]}),
                10,
            ));
        }

        // Clearing a result must not change the on-disk record.
        pad.apply_compaction_plan(&CompactionPlan {
            keep_full: vec![],
            compact: vec![],
            clear: vec![ids[0].clone()],
        });

        let replayed =
            Scratchpad::reload(dir.path().join("scratchpad.jsonl"), ScratchpadConfig::default())
                .unwrap();
        let replayed_ids: Vec<&str> = replayed
            .results()
            .iter()
            .map(|r| r.result_id.as_str())
            .collect();
        assert_eq!(replayed_ids, ids.iter().map(String::as_str).collect::<Vec<_>>());
        // Reload rebuilds tiers as full.
        assert_eq!(replayed.tier_of(&ids[0]), Some(Tier::Full));
    }

    #[test]
    fn cleared_results_stay_retrievable() {
        let dir = tempfile::tempdir().unwrap();
        let mut pad = scratchpad(dir.path());
        let id = pad.append_tool_result(
            "get_metrics",
            serde_json::json!({"service": "api"}),
            serde_json::json!({"p99": 1200}),
            5,
        );

        pad.apply_compaction_plan(&CompactionPlan {
            keep_full: vec![],
            compact: vec![],
            clear: vec![id.clone()],
        });

        assert_eq!(pad.tier_of(&id), Some(Tier::Cleared));
        let stored = pad.get_result_by_id(&id).unwrap();
        assert_eq!(stored.result["p99"], 1200);
        assert!(pad.get_result_by_id("tr_missing").is_err());
    }

    #[test]
    fn soft_cap_warns_at_cap_minus_one_and_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut pad = Scratchpad::new(
            dir.path().join("pad.jsonl"),
            ScratchpadConfig {
                tool_soft_cap: 3,
                ..Default::default()
            },
        );

        let first = pad.can_call_tool("T", Some("alpha beta"));
        assert!(first.allowed && first.warning.is_none());

        let second = pad.can_call_tool("T", Some("gamma delta"));
        assert!(second.allowed && second.warning.is_none());

        let third = pad.can_call_tool("T", Some("epsilon zeta"));
        assert!(third.warning.as_deref().unwrap_or("").contains("3"));

        let fourth = pad.can_call_tool("T", Some("eta theta"));
        assert!(fourth.allowed, "soft cap must never block");
        assert!(fourth.warning.as_deref().unwrap_or("").contains("3/3"));
    }

    #[test]
    fn near_identical_queries_warn_below_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut pad = scratchpad(dir.path());

        pad.can_call_tool("search_logs", Some("error rate payments-api spike"));
        let repeat = pad.can_call_tool("search_logs", Some("error rate payments-api spike"));
        assert!(repeat.allowed);
        assert!(repeat
            .warning
            .as_deref()
            .unwrap_or("")
            .contains("identical"));

        let different = pad.can_call_tool("search_logs", Some("memory usage orders-db"));
        assert!(different.warning.is_none());
    }

    #[test]
    fn tiered_context_renders_all_three_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let mut pad = scratchpad(dir.path());
        let full = pad.append_tool_result(
            "search_logs",
            serde_json::json!({}),
            serde_json::json!({"lines": ["a"]}),
            1,
        );
        let compact = pad.append_tool_result(
            "get_metrics",
            serde_json::json!({}),
            serde_json::json!({"p99": 3}),
            1,
        );
        let cleared = pad.append_tool_result(
            "describe_alarms",
            serde_json::json!({}),
            serde_json::json!({"alarms": []}),
            1,
        );

        pad.apply_compaction_plan(&CompactionPlan {
            keep_full: vec![full.clone()],
            compact: vec![compact.clone()],
            clear: vec![cleared.clone()],
        });

        let context = pad.build_tiered_context();
        assert!(context.contains(&full));
        assert!(context.contains("\"lines\""));
        assert!(context.contains(&format!("- [{compact}]")));
        assert!(!context.contains(&cleared));
        assert!(context.contains("1 older results were cleared"));
        assert!(context.contains("retrieve"));
    }

    #[test]
    fn token_estimate_shrinks_as_tiers_drop() {
        let dir = tempfile::tempdir().unwrap();
        let mut pad = scratchpad(dir.path());
        let id = pad.append_tool_result(
            "search_logs",
            serde_json::json!({}),
            serde_json::json!({"payload": "x".repeat(4000)}),
            1,
        );
        let full_estimate = pad.token_estimate();

        pad.apply_compaction_plan(&CompactionPlan {
            keep_full: vec![],
            compact: vec![id.clone()],
            clear: vec![],
        });
        let compact_estimate = pad.token_estimate();
        assert!(compact_estimate < full_estimate / 2);

        pad.apply_compaction_plan(&CompactionPlan {
            keep_full: vec![],
            compact: vec![],
            clear: vec![id],
        });
        assert!(pad.token_estimate() < compact_estimate);
    }

    #[test]
    fn unknown_log_entry_types_are_ignored_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pad.jsonl");
        let mut pad = Scratchpad::new(path.clone(), ScratchpadConfig::default());
        pad.append_tool_result("t", serde_json::json!({}), serde_json::json!({}), 1);

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"type\":\"future_entry\",\"field\":1}}").unwrap();
        writeln!(file, "{{malformed").unwrap();

        let replayed = Scratchpad::reload(path, ScratchpadConfig::default()).unwrap();
        assert_eq!(replayed.results().len(), 1);
    }
}
