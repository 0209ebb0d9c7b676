use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("service not found: {0}")]
    NodeNotFound(String),

    #[error("dependency not found: {0}")]
    EdgeNotFound(String),

    #[error("graph serialization failed: {0}")]
    Serde(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Service,
    Database,
    Cache,
    Queue,
    External,
    Infrastructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    Critical,
    High,
    Medium,
    Low,
}

/// A node in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceNode {
    pub id: String,
    pub name: String,
    pub service_type: ServiceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<ServiceTier>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, service_type: ServiceType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            service_type,
            team: None,
            tier: None,
            tags: Vec::new(),
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn with_tier(mut self, tier: ServiceTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Criticality of a dependency edge. Ordered so that the *minimum* along a
/// path is its weakest link: a chain passing through an `Optional` edge can
/// only ever carry optional impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCriticality {
    Optional,
    Degraded,
    Critical,
}

/// A directed dependency: `source` depends on `target`. At most one edge per
/// ordered pair; the edge id is `"source->target"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub source: String,
    pub target: String,
    pub dependency_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub criticality: EdgeCriticality,
    pub created_at: DateTime<Utc>,
}

impl DependencyEdge {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        dependency_type: impl Into<String>,
        criticality: EdgeCriticality,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            dependency_type: dependency_type.into(),
            protocol: None,
            criticality,
            created_at: Utc::now(),
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn id(&self) -> String {
        edge_id(&self.source, &self.target)
    }
}

pub fn edge_id(source: &str, target: &str) -> String {
    format!("{source}->{target}")
}

/// A derived impact record: `affected` is reachable from `source` along
/// `path`, with the merged (weakest-link) criticality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactPath {
    pub source: String,
    pub affected: String,
    pub path: Vec<String>,
    pub hops: usize,
    pub criticality: EdgeCriticality,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criticality_minimum_is_the_weakest_link() {
        let path = [
            EdgeCriticality::Critical,
            EdgeCriticality::Degraded,
            EdgeCriticality::Critical,
        ];
        assert_eq!(
            path.iter().copied().min().unwrap(),
            EdgeCriticality::Degraded
        );

        let path = [EdgeCriticality::Critical, EdgeCriticality::Optional];
        assert_eq!(
            path.iter().copied().min().unwrap(),
            EdgeCriticality::Optional
        );
    }

    #[test]
    fn edge_id_format() {
        let edge = DependencyEdge::new("a", "b", "sync_api", EdgeCriticality::Critical);
        assert_eq!(edge.id(), "a->b");
    }
}
