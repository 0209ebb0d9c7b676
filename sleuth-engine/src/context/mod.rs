//! Proactive context managers: knowledge retrieval, infrastructure
//! discovery, and per-service blast-radius context.

mod infra;
mod knowledge;
mod service;

pub use infra::{InfraContextMgr, InfraSnapshot, OverallHealth, SegmentSnapshot};
pub use knowledge::{KnowledgeContext, KnowledgeContextMgr};
pub use service::{BlastRadius, ServiceContext, ServiceContextConfig, ServiceContextMgr};
