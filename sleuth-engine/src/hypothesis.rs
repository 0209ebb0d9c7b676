//! The hypothesis tree: lifecycle, evidence bookkeeping, frontier.
//!
//! Every investigation has exactly one root (the incident itself); proposed
//! hypotheses attach beneath it. A pruned subtree never re-opens; at most
//! one node is ever confirmed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sleuth_core::config::HypothesisConfig;
use sleuth_core::error::{ContractError, PolicyError, SleuthError};
use sleuth_core::investigation::{EvidenceStrength, HypothesisId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    Active,
    Pruned,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisCategory {
    Latency,
    ErrorRate,
    Memory,
    Cpu,
    Connectivity,
    Deployment,
    Database,
    Scaling,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisNode {
    pub id: HypothesisId,
    pub parent_id: Option<HypothesisId>,
    pub statement: String,
    pub category: HypothesisCategory,
    pub priority: u8,
    pub status: HypothesisStatus,
    pub evidence_strength: EvidenceStrength,
    pub depth: u32,
    pub created_at: DateTime<Utc>,
    /// Creation order, used as the frontier tie-break.
    pub sequence: u64,
}

/// Evidence attached to exactly one hypothesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub note_id: Uuid,
    pub hypothesis_id: HypothesisId,
    pub source_result_ids: Vec<String>,
    pub strength: EvidenceStrength,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// What EVALUATE should do with a hypothesis after new evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HypothesisOutcome {
    /// Strong evidence, non-specific statement: generate child sub-hypotheses.
    Branch,
    /// Strong evidence, specific statement: confirm as root cause.
    Confirm,
    /// Weak evidence: keep active, schedule more queries.
    Keep,
    /// No or contradicting evidence: prune the subtree.
    Prune,
}

/// Branch/prune policy applied on EVALUATE.
pub fn decide_outcome(strength: EvidenceStrength, statement_is_specific: bool) -> HypothesisOutcome {
    match strength {
        EvidenceStrength::Strong if statement_is_specific => HypothesisOutcome::Confirm,
        EvidenceStrength::Strong => HypothesisOutcome::Branch,
        EvidenceStrength::Weak => HypothesisOutcome::Keep,
        EvidenceStrength::Pending => HypothesisOutcome::Keep,
        EvidenceStrength::None | EvidenceStrength::Contradicting => HypothesisOutcome::Prune,
    }
}

/// A statement is specific enough to confirm when it names a known service
/// or a concrete resource-like identifier.
pub fn is_specific(statement: &str, known_services: &[String]) -> bool {
    let lowered = statement.to_lowercase();
    if known_services
        .iter()
        .any(|s| lowered.contains(&s.to_lowercase()))
    {
        return true;
    }
    statement
        .split_whitespace()
        .any(|token| token.len() > 3 && (token.contains('-') || token.contains('.')))
}

pub struct HypothesisEngine {
    config: HypothesisConfig,
    nodes: HashMap<HypothesisId, HypothesisNode>,
    children: HashMap<HypothesisId, Vec<HypothesisId>>,
    evidence: HashMap<HypothesisId, Vec<Evidence>>,
    root: HypothesisId,
    confirmed: Option<HypothesisId>,
    next_sequence: u64,
}

impl HypothesisEngine {
    /// Create the tree with its root node representing the incident itself.
    pub fn new(query: &str, config: HypothesisConfig) -> Self {
        let root_id = Uuid::new_v4();
        let root = HypothesisNode {
            id: root_id,
            parent_id: None,
            statement: query.to_string(),
            category: HypothesisCategory::Other,
            priority: 0,
            status: HypothesisStatus::Active,
            evidence_strength: EvidenceStrength::Pending,
            depth: 0,
            created_at: Utc::now(),
            sequence: 0,
        };
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            config,
            nodes,
            children: HashMap::new(),
            evidence: HashMap::new(),
            root: root_id,
            confirmed: None,
            next_sequence: 1,
        }
    }

    pub fn root_id(&self) -> HypothesisId {
        self.root
    }

    pub fn get(&self, id: HypothesisId) -> Result<&HypothesisNode, SleuthError> {
        self.nodes
            .get(&id)
            .ok_or_else(|| ContractError::UnknownHypothesis { id: id.to_string() }.into())
    }

    /// Propose a hypothesis. Without a parent it attaches beneath the root.
    /// Rejected when the parent is pruned/confirmed or the depth budget is
    /// exhausted.
    pub fn propose(
        &mut self,
        statement: &str,
        category: HypothesisCategory,
        priority: u8,
        parent_id: Option<HypothesisId>,
    ) -> Result<HypothesisNode, SleuthError> {
        let parent_id = parent_id.unwrap_or(self.root);
        let parent = self
            .nodes
            .get(&parent_id)
            .ok_or_else(|| ContractError::UnknownHypothesis {
                id: parent_id.to_string(),
            })?;
        match parent.status {
            HypothesisStatus::Pruned => {
                return Err(PolicyError::PrunedHypothesis {
                    id: parent_id.to_string(),
                }
                .into());
            }
            HypothesisStatus::Confirmed => {
                return Err(PolicyError::AlreadyResolved {
                    id: parent_id.to_string(),
                    status: "confirmed".into(),
                }
                .into());
            }
            HypothesisStatus::Active => {}
        }

        let depth = parent.depth + 1;
        if depth > self.config.max_depth {
            return Err(PolicyError::DepthBudgetExceeded {
                depth,
                max: self.config.max_depth,
            }
            .into());
        }

        let node = HypothesisNode {
            id: Uuid::new_v4(),
            parent_id: Some(parent_id),
            statement: statement.to_string(),
            category,
            priority,
            status: HypothesisStatus::Active,
            evidence_strength: EvidenceStrength::Pending,
            depth,
            created_at: Utc::now(),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        self.children.entry(parent_id).or_default().push(node.id);
        self.nodes.insert(node.id, node.clone());
        tracing::debug!(
            hypothesis = %node.id,
            depth,
            priority,
            "hypothesis proposed"
        );
        Ok(node)
    }

    /// Append evidence and update the node's current strength assessment.
    pub fn attach_evidence(
        &mut self,
        hypothesis_id: HypothesisId,
        strength: EvidenceStrength,
        content: &str,
        source_result_ids: Vec<String>,
    ) -> Result<(), SleuthError> {
        let node = self
            .nodes
            .get_mut(&hypothesis_id)
            .ok_or_else(|| ContractError::UnknownHypothesis {
                id: hypothesis_id.to_string(),
            })?;
        if node.status == HypothesisStatus::Pruned {
            return Err(PolicyError::PrunedHypothesis {
                id: hypothesis_id.to_string(),
            }
            .into());
        }
        node.evidence_strength = strength;
        self.evidence
            .entry(hypothesis_id)
            .or_default()
            .push(Evidence {
                note_id: Uuid::new_v4(),
                hypothesis_id,
                source_result_ids,
                strength,
                content: content.to_string(),
                timestamp: Utc::now(),
            });
        Ok(())
    }

    pub fn evidence_for(&self, hypothesis_id: HypothesisId) -> &[Evidence] {
        self.evidence
            .get(&hypothesis_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Prune the node and its entire subtree. Returns the pruned ids.
    pub fn prune(
        &mut self,
        hypothesis_id: HypothesisId,
        reason: &str,
    ) -> Result<Vec<HypothesisId>, SleuthError> {
        let node = self
            .nodes
            .get(&hypothesis_id)
            .ok_or_else(|| ContractError::UnknownHypothesis {
                id: hypothesis_id.to_string(),
            })?;
        match node.status {
            HypothesisStatus::Pruned => {
                return Err(PolicyError::PrunedHypothesis {
                    id: hypothesis_id.to_string(),
                }
                .into());
            }
            HypothesisStatus::Confirmed => {
                return Err(PolicyError::AlreadyResolved {
                    id: hypothesis_id.to_string(),
                    status: "confirmed".into(),
                }
                .into());
            }
            HypothesisStatus::Active => {}
        }

        let mut pruned = Vec::new();
        let mut stack = vec![hypothesis_id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(&id) {
                if node.status == HypothesisStatus::Active {
                    node.status = HypothesisStatus::Pruned;
                    pruned.push(id);
                }
            }
            if let Some(children) = self.children.get(&id) {
                stack.extend(children.iter().copied());
            }
        }
        tracing::info!(
            hypothesis = %hypothesis_id,
            subtree = pruned.len(),
            reason,
            "hypothesis pruned"
        );
        Ok(pruned)
    }

    /// Confirm a hypothesis as the root cause. At most one per tree.
    pub fn confirm(
        &mut self,
        hypothesis_id: HypothesisId,
        evidence: Vec<Evidence>,
    ) -> Result<(), SleuthError> {
        if let Some(existing) = self.confirmed {
            return Err(PolicyError::AlreadyResolved {
                id: existing.to_string(),
                status: "confirmed".into(),
            }
            .into());
        }
        let node = self
            .nodes
            .get_mut(&hypothesis_id)
            .ok_or_else(|| ContractError::UnknownHypothesis {
                id: hypothesis_id.to_string(),
            })?;
        if node.status == HypothesisStatus::Pruned {
            return Err(PolicyError::PrunedHypothesis {
                id: hypothesis_id.to_string(),
            }
            .into());
        }
        node.status = HypothesisStatus::Confirmed;
        node.evidence_strength = EvidenceStrength::Strong;
        self.evidence
            .entry(hypothesis_id)
            .or_default()
            .extend(evidence);
        self.confirmed = Some(hypothesis_id);
        tracing::info!(hypothesis = %hypothesis_id, "hypothesis confirmed");
        Ok(())
    }

    pub fn confirmed(&self) -> Option<&HypothesisNode> {
        self.confirmed.and_then(|id| self.nodes.get(&id))
    }

    /// Active leaf hypotheses still worth investigating, ordered by
    /// (priority desc, creation order). The root is never investigable.
    pub fn frontier(&self) -> Vec<&HypothesisNode> {
        let mut frontier: Vec<&HypothesisNode> = self
            .nodes
            .values()
            .filter(|node| {
                node.id != self.root
                    && node.status == HypothesisStatus::Active
                    && self.is_leaf(node.id)
                    && matches!(
                        node.evidence_strength,
                        EvidenceStrength::Pending
                            | EvidenceStrength::None
                            | EvidenceStrength::Weak
                    )
            })
            .collect();
        frontier.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
        frontier
    }

    /// A node is a leaf when it has no live (non-pruned) children.
    fn is_leaf(&self, id: HypothesisId) -> bool {
        self.children
            .get(&id)
            .map(|children| {
                children.iter().all(|child| {
                    self.nodes
                        .get(child)
                        .map(|n| n.status == HypothesisStatus::Pruned)
                        .unwrap_or(true)
                })
            })
            .unwrap_or(true)
    }

    pub fn is_complete(&self) -> bool {
        self.confirmed.is_some() || self.frontier().is_empty()
    }

    /// All live hypothesis ids (excluding the root), frontier or not.
    pub fn active_ids(&self) -> Vec<HypothesisId> {
        self.nodes
            .values()
            .filter(|n| n.id != self.root && n.status == HypothesisStatus::Active)
            .map(|n| n.id)
            .collect()
    }

    pub fn active_statements(&self) -> Vec<String> {
        self.frontier()
            .iter()
            .map(|n| n.statement.clone())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
