use std::collections::HashSet;
use std::sync::Arc;

use sleuth_core::config::KnowledgeConfig;
use sleuth_core::error::ToolError;
use sleuth_core::investigation::InvestigationState;
use sleuth_core::knowledge::{ChunkType, KnowledgeChunk, KnowledgeSearch, SearchFilter};

/// The small, ranked set of chunks currently held in memory for prompting.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeContext {
    pub runbooks: Vec<KnowledgeChunk>,
    pub postmortems: Vec<KnowledgeChunk>,
    pub known_issues: Vec<KnowledgeChunk>,
}

impl KnowledgeContext {
    pub fn total(&self) -> usize {
        self.runbooks.len() + self.postmortems.len() + self.known_issues.len()
    }
}

/// Keeps relevant knowledge in memory, re-querying whenever the
/// investigation surfaces services or symptoms it has not seen before.
pub struct KnowledgeContextMgr {
    search: Arc<dyn KnowledgeSearch>,
    config: KnowledgeConfig,
    seen_services: HashSet<String>,
    seen_symptoms: HashSet<String>,
    context: KnowledgeContext,
}

impl KnowledgeContextMgr {
    pub fn new(search: Arc<dyn KnowledgeSearch>, config: KnowledgeConfig) -> Self {
        Self {
            search,
            config,
            seen_services: HashSet::new(),
            seen_symptoms: HashSet::new(),
            context: KnowledgeContext::default(),
        }
    }

    pub fn context(&self) -> &KnowledgeContext {
        &self.context
    }

    /// Prefetch active known issues so triage starts informed.
    pub async fn init(&mut self) -> Result<(), ToolError> {
        let results = self
            .search
            .search(
                "active known issue",
                &SearchFilter {
                    type_filter: Some(ChunkType::KnownIssue),
                    limit: Some(self.config.max_known_issues),
                    ..Default::default()
                },
            )
            .await?;
        self.merge(results.known_issues, ChunkKind::KnownIssue);
        tracing::info!(known_issues = self.context.known_issues.len(), "knowledge manager primed");
        Ok(())
    }

    /// Initial retrieval for the investigation query.
    pub async fn query_for_investigation(
        &mut self,
        query: &str,
        services: Option<&[String]>,
    ) -> Result<(), ToolError> {
        let filter = SearchFilter {
            service_filter: services.map(|s| s.to_vec()),
            ..Default::default()
        };
        let results = self.search.search(query, &filter).await?;
        self.merge(results.runbooks, ChunkKind::Runbook);
        self.merge(results.postmortems, ChunkKind::Postmortem);
        self.merge(results.known_issues, ChunkKind::KnownIssue);
        if let Some(services) = services {
            self.seen_services
                .extend(services.iter().map(|s| s.to_string()));
        }
        Ok(())
    }

    /// Re-query for services not seen before. Already-seen names are skipped.
    pub async fn query_for_new_services(
        &mut self,
        services: &[String],
    ) -> Result<usize, ToolError> {
        let fresh: Vec<String> = services
            .iter()
            .filter(|s| !self.seen_services.contains(*s))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }
        tracing::debug!(services = ?fresh, "querying knowledge for newly discovered services");

        let results = self
            .search
            .search(
                &fresh.join(" "),
                &SearchFilter {
                    service_filter: Some(fresh.clone()),
                    ..Default::default()
                },
            )
            .await?;
        let added = self.merge(results.runbooks, ChunkKind::Runbook)
            + self.merge(results.postmortems, ChunkKind::Postmortem)
            + self.merge(results.known_issues, ChunkKind::KnownIssue);
        self.seen_services.extend(fresh);
        Ok(added)
    }

    /// Re-query for symptoms not seen before.
    pub async fn query_for_new_symptoms(
        &mut self,
        symptoms: &[String],
    ) -> Result<usize, ToolError> {
        let fresh: Vec<String> = symptoms
            .iter()
            .filter(|s| !self.seen_symptoms.contains(*s))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }
        tracing::debug!(symptoms = ?fresh, "querying knowledge for new symptoms");

        let results = self
            .search
            .search(&fresh.join(" "), &SearchFilter::default())
            .await?;
        let added = self.merge(results.runbooks, ChunkKind::Runbook)
            + self.merge(results.postmortems, ChunkKind::Postmortem)
            + self.merge(results.known_issues, ChunkKind::KnownIssue);
        self.seen_symptoms.extend(fresh);
        Ok(added)
    }

    /// Compute deltas against what the manager has already seen and
    /// re-query for both.
    pub async fn update_from_investigation_state(
        &mut self,
        state: &InvestigationState,
    ) -> Result<usize, ToolError> {
        let mut added = self.query_for_new_services(&state.services_discovered).await?;
        added += self.query_for_new_symptoms(&state.symptoms_identified).await?;
        Ok(added)
    }

    /// Merge new chunks: dedupe by id, keep descending score, trim to the
    /// per-type limit, drop below the relevance floor. Returns how many
    /// genuinely new chunks entered the context.
    fn merge(&mut self, incoming: Vec<KnowledgeChunk>, kind: ChunkKind) -> usize {
        let min_relevance = self.config.min_relevance;
        let (bucket, limit) = match kind {
            ChunkKind::Runbook => (&mut self.context.runbooks, self.config.max_runbooks),
            ChunkKind::Postmortem => (&mut self.context.postmortems, self.config.max_postmortems),
            ChunkKind::KnownIssue => {
                (&mut self.context.known_issues, self.config.max_known_issues)
            }
        };

        let mut added = 0;
        for chunk in incoming {
            if chunk.score < min_relevance {
                continue;
            }
            if bucket.iter().any(|existing| existing.id == chunk.id) {
                continue;
            }
            bucket.push(chunk);
            added += 1;
        }
        bucket.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        bucket.truncate(limit);
        added
    }

    /// Compact block for prompt injection.
    pub fn build_compact_summary(&self) -> String {
        let mut out = String::new();
        if !self.context.known_issues.is_empty() {
            out.push_str("Known issues:\n");
            for chunk in &self.context.known_issues {
                out.push_str(&format!("- {}: {}\n", chunk.title, first_line(&chunk.content)));
            }
        }
        if !self.context.runbooks.is_empty() {
            out.push_str("Relevant runbooks:\n");
            for chunk in &self.context.runbooks {
                out.push_str(&format!(
                    "- {} (services: {})\n",
                    chunk.title,
                    chunk.services.join(", ")
                ));
            }
        }
        if !self.context.postmortems.is_empty() {
            out.push_str("Related postmortems:\n");
            for chunk in &self.context.postmortems {
                out.push_str(&format!("- {}: {}\n", chunk.title, first_line(&chunk.content)));
            }
        }
        out
    }
}

enum ChunkKind {
    Runbook,
    Postmortem,
    KnownIssue,
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_core::knowledge::StaticKnowledgeSearch;

    fn chunk(id: &str, ty: ChunkType, services: &[&str], score: f64, content: &str) -> KnowledgeChunk {
        KnowledgeChunk {
            id: id.into(),
            document_id: format!("doc-{id}"),
            title: format!("title {id}"),
            content: content.into(),
            services: services.iter().map(|s| s.to_string()).collect(),
            score,
            chunk_type: ty,
        }
    }

    fn manager(chunks: Vec<KnowledgeChunk>) -> KnowledgeContextMgr {
        KnowledgeContextMgr::new(
            Arc::new(StaticKnowledgeSearch::new(chunks)),
            KnowledgeConfig::default(),
        )
    }

    #[tokio::test]
    async fn initial_query_fills_buckets_and_respects_floor() {
        let mut mgr = manager(vec![
            chunk("r1", ChunkType::Runbook, &["payments-api"], 0.9, "latency runbook"),
            chunk("r2", ChunkType::Runbook, &["payments-api"], 0.1, "latency stale"),
            chunk("p1", ChunkType::Postmortem, &["payments-api"], 0.8, "latency postmortem"),
        ]);

        mgr.query_for_investigation("latency", None).await.unwrap();
        assert_eq!(mgr.context().runbooks.len(), 1, "low-score chunk dropped");
        assert_eq!(mgr.context().postmortems.len(), 1);
    }

    #[tokio::test]
    async fn re_query_only_for_unseen_services() {
        let mut mgr = manager(vec![
            chunk("r1", ChunkType::Runbook, &["payments-api"], 0.9, "payments-api runbook"),
            chunk("r2", ChunkType::Runbook, &["orders-db"], 0.85, "orders-db runbook"),
        ]);

        let added = mgr
            .query_for_new_services(&["payments-api".to_string()])
            .await
            .unwrap();
        assert_eq!(added, 1);

        // Same service again: no query, nothing added.
        let added = mgr
            .query_for_new_services(&["payments-api".to_string()])
            .await
            .unwrap();
        assert_eq!(added, 0);

        let added = mgr
            .query_for_new_services(&["payments-api".to_string(), "orders-db".to_string()])
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(mgr.context().runbooks.len(), 2);
    }

    #[tokio::test]
    async fn merge_dedupes_and_trims_by_score() {
        let mut mgr = KnowledgeContextMgr::new(
            Arc::new(StaticKnowledgeSearch::new(vec![
                chunk("a", ChunkType::KnownIssue, &[], 0.9, "issue a"),
                chunk("b", ChunkType::KnownIssue, &[], 0.7, "issue b"),
                chunk("c", ChunkType::KnownIssue, &[], 0.8, "issue c"),
                chunk("d", ChunkType::KnownIssue, &[], 0.6, "issue d"),
            ])),
            KnowledgeConfig {
                max_known_issues: 2,
                ..Default::default()
            },
        );

        mgr.query_for_new_symptoms(&["issue".to_string()]).await.unwrap();
        mgr.query_for_new_symptoms(&["issue again".to_string()]).await.unwrap();

        let ids: Vec<&str> = mgr
            .context()
            .known_issues
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "c"], "kept top two by score, no duplicates");
    }

    #[tokio::test]
    async fn update_from_state_covers_both_deltas() {
        let mut mgr = manager(vec![
            chunk("r1", ChunkType::Runbook, &["checkout-api"], 0.9, "checkout-api runbook"),
            chunk("k1", ChunkType::KnownIssue, &[], 0.9, "elevated latency known issue"),
        ]);

        let mut state = InvestigationState::new("query", None, "s".into());
        state.discover_service("checkout-api");
        state.identify_symptom("elevated latency");

        let added = mgr.update_from_investigation_state(&state).await.unwrap();
        assert!(added >= 2);

        // Second pass with unchanged state is a no-op.
        assert_eq!(mgr.update_from_investigation_state(&state).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn compact_summary_lists_titles() {
        let mut mgr = manager(vec![chunk(
            "k1",
            ChunkType::KnownIssue,
            &[],
            0.9,
            "pool saturation recurring\nmore detail",
        )]);
        mgr.init().await.unwrap();

        let summary = mgr.build_compact_summary();
        assert!(summary.contains("Known issues:"));
        assert!(summary.contains("title k1"));
        assert!(summary.contains("pool saturation recurring"));
        assert!(!summary.contains("more detail"));
    }
}
