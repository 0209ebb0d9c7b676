use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Facet type of an indexed knowledge chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Runbook,
    Postmortem,
    KnownIssue,
    Architecture,
    Ownership,
}

/// A ranked chunk returned by the knowledge store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub document_id: String,
    pub title: String,
    pub content: String,
    pub services: Vec<String>,
    pub score: f64,
    pub chunk_type: ChunkType,
}

/// Filters applied server-side by the knowledge store.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub service_filter: Option<Vec<String>>,
    pub type_filter: Option<ChunkType>,
    pub limit: Option<usize>,
}

/// Search results grouped by facet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub runbooks: Vec<KnowledgeChunk>,
    pub postmortems: Vec<KnowledgeChunk>,
    pub known_issues: Vec<KnowledgeChunk>,
    pub architecture: Vec<KnowledgeChunk>,
    pub ownership: Vec<KnowledgeChunk>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.runbooks.is_empty()
            && self.postmortems.is_empty()
            && self.known_issues.is_empty()
            && self.architecture.is_empty()
            && self.ownership.is_empty()
    }

    pub fn total(&self) -> usize {
        self.runbooks.len()
            + self.postmortems.len()
            + self.known_issues.len()
            + self.architecture.len()
            + self.ownership.len()
    }
}

/// Seam over the external knowledge store (document ingestion, tokenization
/// and ranking live behind it).
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(&self, query: &str, filter: &SearchFilter)
        -> Result<SearchResults, ToolError>;
}

/// A fixed-corpus knowledge search for tests.
#[derive(Default)]
pub struct StaticKnowledgeSearch {
    pub chunks: Vec<KnowledgeChunk>,
}

impl StaticKnowledgeSearch {
    pub fn new(chunks: Vec<KnowledgeChunk>) -> Self {
        Self { chunks }
    }
}

#[async_trait]
impl KnowledgeSearch for StaticKnowledgeSearch {
    async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
    ) -> Result<SearchResults, ToolError> {
        let query_lower = query.to_lowercase();
        let tokens: Vec<&str> = query_lower.split_whitespace().collect();
        let mut results = SearchResults::default();

        for chunk in &self.chunks {
            if let Some(wanted) = filter.type_filter {
                if chunk.chunk_type != wanted {
                    continue;
                }
            }
            if let Some(ref services) = filter.service_filter {
                if !services.iter().any(|s| chunk.services.contains(s)) {
                    continue;
                }
            }
            let haystack = format!("{} {}", chunk.title, chunk.content).to_lowercase();
            if !tokens.is_empty() && !tokens.iter().any(|t| haystack.contains(t)) {
                continue;
            }
            let bucket = match chunk.chunk_type {
                ChunkType::Runbook => &mut results.runbooks,
                ChunkType::Postmortem => &mut results.postmortems,
                ChunkType::KnownIssue => &mut results.known_issues,
                ChunkType::Architecture => &mut results.architecture,
                ChunkType::Ownership => &mut results.ownership,
            };
            if let Some(limit) = filter.limit {
                if bucket.len() >= limit {
                    continue;
                }
            }
            bucket.push(chunk.clone());
        }

        Ok(results)
    }
}
