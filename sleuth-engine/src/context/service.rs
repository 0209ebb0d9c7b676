use std::sync::Arc;

use tokio::sync::RwLock;

use sleuth_core::knowledge::KnowledgeChunk;
use sleuth_graph::{EdgeCriticality, ImpactPath, ServiceGraph, ServiceTier, ServiceType};

use crate::context::knowledge::KnowledgeContext;

#[derive(Debug, Clone)]
pub struct ServiceContextConfig {
    /// Depth cap for upstream-cause traversal.
    pub max_dependency_depth: usize,
}

impl Default for ServiceContextConfig {
    fn default() -> Self {
        Self {
            max_dependency_depth: 3,
        }
    }
}

/// Who breaks when this service breaks.
#[derive(Debug, Clone, Default)]
pub struct BlastRadius {
    pub direct_dependents: Vec<String>,
    pub transitive_dependents: Vec<String>,
    pub critical_services_affected: Vec<String>,
    pub critical_paths: Vec<ImpactPath>,
}

/// Aggregated per-service context handed to the state machine.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub service: String,
    pub team: Option<String>,
    pub tier: Option<ServiceTier>,
    pub direct_dependencies: Vec<String>,
    pub critical_dependencies: Vec<String>,
    pub potential_upstream_causes: Vec<String>,
    pub blast_radius: BlastRadius,
    pub runbooks: Vec<KnowledgeChunk>,
    pub known_issues: Vec<KnowledgeChunk>,
    pub postmortems: Vec<KnowledgeChunk>,
}

impl ServiceContext {
    pub fn build_compact_summary(&self) -> String {
        let mut out = format!("Service {}", self.service);
        if let Some(ref team) = self.team {
            out.push_str(&format!(" (owned by {team})"));
        }
        out.push('\n');
        if !self.critical_dependencies.is_empty() {
            out.push_str(&format!(
                "Critical dependencies: {}\n",
                self.critical_dependencies.join(", ")
            ));
        }
        if !self.potential_upstream_causes.is_empty() {
            out.push_str(&format!(
                "Potential upstream causes: {}\n",
                self.potential_upstream_causes.join(", ")
            ));
        }
        out.push_str(&format!(
            "Blast radius: {} direct dependents, {} transitive, {} critical services affected\n",
            self.blast_radius.direct_dependents.len(),
            self.blast_radius.transitive_dependents.len(),
            self.blast_radius.critical_services_affected.len()
        ));
        if !self.runbooks.is_empty() {
            out.push_str(&format!(
                "Runbooks: {}\n",
                self.runbooks
                    .iter()
                    .map(|r| r.title.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            ));
        }
        out
    }
}

/// Merges the service graph and the knowledge context into per-service
/// context objects.
pub struct ServiceContextMgr {
    graph: Arc<RwLock<ServiceGraph>>,
    config: ServiceContextConfig,
}

impl ServiceContextMgr {
    pub fn new(graph: Arc<RwLock<ServiceGraph>>, config: ServiceContextConfig) -> Self {
        Self { graph, config }
    }

    /// Build the context for one investigated service. `None` when the
    /// service is not in the graph (knowledge may still reference it).
    pub async fn build_context(
        &self,
        service: &str,
        knowledge: &KnowledgeContext,
    ) -> Option<ServiceContext> {
        let graph = self.graph.read().await;
        let node = graph
            .get_service(service)
            .or_else(|| graph.get_service_by_name(service))?;
        let id = node.id.clone();
        let team = node.team.clone();
        let tier = node.tier;

        let dependencies = graph.dependencies_of(&id);
        let direct_dependencies: Vec<String> =
            dependencies.iter().map(|e| e.target.clone()).collect();
        let critical_dependencies: Vec<String> = dependencies
            .iter()
            .filter(|e| e.criticality == EdgeCriticality::Critical)
            .map(|e| e.target.clone())
            .collect();

        // Upstream causes: what this service depends on, preferring critical
        // edges and stateful (database/cache) nodes.
        let mut downstream = graph.get_downstream_impact(&id, self.config.max_dependency_depth);
        downstream.sort_by(|a, b| {
            b.criticality
                .cmp(&a.criticality)
                .then_with(|| stateful_rank(&graph, &b.affected).cmp(&stateful_rank(&graph, &a.affected)))
                .then(a.hops.cmp(&b.hops))
        });
        let potential_upstream_causes: Vec<String> =
            downstream.iter().map(|i| i.affected.clone()).collect();

        // Blast radius: everyone who depends on this service.
        let impacts = graph.get_upstream_impact(&id, self.config.max_dependency_depth);
        let direct_dependents: Vec<String> = impacts
            .iter()
            .filter(|i| i.hops == 1)
            .map(|i| i.affected.clone())
            .collect();
        let transitive_dependents: Vec<String> = impacts
            .iter()
            .filter(|i| i.hops > 1)
            .map(|i| i.affected.clone())
            .collect();
        let critical_services_affected: Vec<String> = impacts
            .iter()
            .filter(|i| {
                graph
                    .get_service(&i.affected)
                    .map(|n| n.tier == Some(ServiceTier::Critical))
                    .unwrap_or(false)
            })
            .map(|i| i.affected.clone())
            .collect();
        let critical_paths: Vec<ImpactPath> = impacts
            .iter()
            .filter(|i| i.criticality == EdgeCriticality::Critical)
            .cloned()
            .collect();
        drop(graph);

        let name_matches =
            |chunk: &KnowledgeChunk| chunk.services.iter().any(|s| s == service || s == &id);
        Some(ServiceContext {
            service: service.to_string(),
            team,
            tier,
            direct_dependencies,
            critical_dependencies,
            potential_upstream_causes,
            blast_radius: BlastRadius {
                direct_dependents,
                transitive_dependents,
                critical_services_affected,
                critical_paths,
            },
            runbooks: knowledge
                .runbooks
                .iter()
                .filter(|c| name_matches(c))
                .cloned()
                .collect(),
            known_issues: knowledge
                .known_issues
                .iter()
                .filter(|c| name_matches(c))
                .cloned()
                .collect(),
            postmortems: knowledge.postmortems.clone(),
        })
    }
}

fn stateful_rank(graph: &ServiceGraph, id: &str) -> u8 {
    match graph.get_service(id).map(|n| n.service_type) {
        Some(ServiceType::Database) => 2,
        Some(ServiceType::Cache) => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_core::knowledge::ChunkType;
    use sleuth_graph::{DependencyEdge, ServiceNode};

    async fn graph() -> Arc<RwLock<ServiceGraph>> {
        let mut g = ServiceGraph::new();
        g.add_service(ServiceNode::new("web", "web", ServiceType::Service).with_tier(ServiceTier::Critical));
        g.add_service(ServiceNode::new("api", "api", ServiceType::Service).with_team("platform"));
        g.add_service(ServiceNode::new("orders-db", "orders-db", ServiceType::Database));
        g.add_service(ServiceNode::new("cache", "cache", ServiceType::Cache));

        g.add_dependency(DependencyEdge::new("web", "api", "sync_api", EdgeCriticality::Critical))
            .unwrap();
        g.add_dependency(DependencyEdge::new("api", "orders-db", "sql", EdgeCriticality::Critical))
            .unwrap();
        g.add_dependency(DependencyEdge::new("api", "cache", "redis", EdgeCriticality::Optional))
            .unwrap();
        Arc::new(RwLock::new(g))
    }

    fn runbook_for(service: &str) -> KnowledgeChunk {
        KnowledgeChunk {
            id: format!("rb-{service}"),
            document_id: "doc".into(),
            title: format!("runbook for {service}"),
            content: String::new(),
            services: vec![service.to_string()],
            score: 0.9,
            chunk_type: ChunkType::Runbook,
        }
    }

    #[tokio::test]
    async fn context_merges_graph_and_knowledge() {
        let mgr = ServiceContextMgr::new(graph().await, ServiceContextConfig::default());
        let knowledge = KnowledgeContext {
            runbooks: vec![runbook_for("api"), runbook_for("web")],
            ..Default::default()
        };

        let context = mgr.build_context("api", &knowledge).await.expect("api known");
        assert_eq!(context.team.as_deref(), Some("platform"));
        assert_eq!(context.direct_dependencies, vec!["orders-db", "cache"]);
        assert_eq!(context.critical_dependencies, vec!["orders-db"]);
        // Database ranks above cache among upstream causes.
        assert_eq!(context.potential_upstream_causes[0], "orders-db");

        assert_eq!(context.blast_radius.direct_dependents, vec!["web"]);
        assert!(context.blast_radius.transitive_dependents.is_empty());
        assert_eq!(context.blast_radius.critical_services_affected, vec!["web"]);
        assert_eq!(context.blast_radius.critical_paths.len(), 1);

        // Only the api runbook survives the name filter.
        assert_eq!(context.runbooks.len(), 1);
        assert_eq!(context.runbooks[0].id, "rb-api");
    }

    #[tokio::test]
    async fn unknown_service_yields_none() {
        let mgr = ServiceContextMgr::new(graph().await, ServiceContextConfig::default());
        assert!(mgr
            .build_context("ghost", &KnowledgeContext::default())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn summary_counts_blast_radius() {
        let mgr = ServiceContextMgr::new(graph().await, ServiceContextConfig::default());
        let context = mgr
            .build_context("orders-db", &KnowledgeContext::default())
            .await
            .unwrap();
        // api depends on orders-db directly, web transitively.
        assert_eq!(context.blast_radius.direct_dependents, vec!["api"]);
        assert_eq!(context.blast_radius.transitive_dependents, vec!["web"]);

        let summary = context.build_compact_summary();
        assert!(summary.contains("1 direct dependents"));
        assert!(summary.contains("1 transitive"));
    }
}
