//! Typed directed graph of services and dependencies.
//!
//! Backs context building and impact analysis: shortest paths, cycle
//! detection, upstream/downstream blast radius with criticality merging.
//! The graph is process-wide and read-mostly; modifications are serialized
//! by a single writer.

mod graph;
mod types;

pub use graph::{GraphDocument, ServiceGraph};
pub use types::{
    edge_id, DependencyEdge, EdgeCriticality, GraphError, ImpactPath, ServiceNode, ServiceTier,
    ServiceType,
};
