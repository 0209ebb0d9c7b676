use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{
    edge_id, DependencyEdge, EdgeCriticality, GraphError, ImpactPath, ServiceNode, ServiceTier,
    ServiceType,
};

/// Serialized graph shape: `{nodes: [], edges: []}` with ISO-8601 timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<ServiceNode>,
    pub edges: Vec<DependencyEdge>,
}

/// Typed directed graph of services. The edge map and both adjacency indexes
/// are kept in sync by every mutation.
#[derive(Debug, Default, Clone)]
pub struct ServiceGraph {
    nodes: HashMap<String, ServiceNode>,
    edges: HashMap<String, DependencyEdge>,
    outgoing: HashMap<String, Vec<String>>,
    incoming: HashMap<String, Vec<String>>,
}

impl ServiceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Insert or update a service. Updating preserves `created_at` and
    /// refreshes `updated_at`; repeated identical calls are no-ops beyond the
    /// timestamp.
    pub fn add_service(&mut self, node: ServiceNode) {
        match self.nodes.get_mut(&node.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = node;
                existing.created_at = created_at;
                existing.updated_at = chrono::Utc::now();
            }
            None => {
                self.outgoing.entry(node.id.clone()).or_default();
                self.incoming.entry(node.id.clone()).or_default();
                self.nodes.insert(node.id.clone(), node);
            }
        }
    }

    pub fn update_service(
        &mut self,
        id: &str,
        mutate: impl FnOnce(&mut ServiceNode),
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        mutate(node);
        node.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Remove a service and every incident edge atomically.
    pub fn remove_service(&mut self, id: &str) -> Result<ServiceNode, GraphError> {
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;

        for target in self.outgoing.remove(id).unwrap_or_default() {
            self.edges.remove(&edge_id(id, &target));
            if let Some(sources) = self.incoming.get_mut(&target) {
                sources.retain(|s| s != id);
            }
        }
        for source in self.incoming.remove(id).unwrap_or_default() {
            self.edges.remove(&edge_id(&source, id));
            if let Some(targets) = self.outgoing.get_mut(&source) {
                targets.retain(|t| t != id);
            }
        }
        Ok(node)
    }

    pub fn get_service(&self, id: &str) -> Option<&ServiceNode> {
        self.nodes.get(id)
    }

    pub fn get_service_by_name(&self, name: &str) -> Option<&ServiceNode> {
        let lowered = name.to_lowercase();
        self.nodes
            .values()
            .find(|n| n.name.to_lowercase() == lowered)
    }

    pub fn services_by_team(&self, team: &str) -> Vec<&ServiceNode> {
        let mut found: Vec<&ServiceNode> = self
            .nodes
            .values()
            .filter(|n| n.team.as_deref() == Some(team))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn services_by_type(&self, service_type: ServiceType) -> Vec<&ServiceNode> {
        let mut found: Vec<&ServiceNode> = self
            .nodes
            .values()
            .filter(|n| n.service_type == service_type)
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn services_by_tag(&self, tag: &str) -> Vec<&ServiceNode> {
        let mut found: Vec<&ServiceNode> = self
            .nodes
            .values()
            .filter(|n| n.tags.iter().any(|t| t == tag))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn services_by_tier(&self, tier: ServiceTier) -> Vec<&ServiceNode> {
        let mut found: Vec<&ServiceNode> = self
            .nodes
            .values()
            .filter(|n| n.tier == Some(tier))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Case-insensitive substring search over id, name and tags.
    pub fn search(&self, query: &str) -> Vec<&ServiceNode> {
        let lowered = query.to_lowercase();
        let mut found: Vec<&ServiceNode> = self
            .nodes
            .values()
            .filter(|n| {
                n.id.to_lowercase().contains(&lowered)
                    || n.name.to_lowercase().contains(&lowered)
                    || n.tags.iter().any(|t| t.to_lowercase().contains(&lowered))
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Add a dependency edge. An existing ordered pair is overwritten (last
    /// write wins); both endpoints must exist.
    pub fn add_dependency(&mut self, edge: DependencyEdge) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&edge.source) {
            return Err(GraphError::NodeNotFound(edge.source));
        }
        if !self.nodes.contains_key(&edge.target) {
            return Err(GraphError::NodeNotFound(edge.target));
        }

        let id = edge.id();
        if self.edges.insert(id, edge.clone()).is_none() {
            self.outgoing
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
            self.incoming
                .entry(edge.target.clone())
                .or_default()
                .push(edge.source.clone());
        }
        Ok(())
    }

    pub fn remove_dependency(
        &mut self,
        source: &str,
        target: &str,
    ) -> Result<DependencyEdge, GraphError> {
        let id = edge_id(source, target);
        let edge = self
            .edges
            .remove(&id)
            .ok_or_else(|| GraphError::EdgeNotFound(id))?;
        if let Some(targets) = self.outgoing.get_mut(source) {
            targets.retain(|t| t != target);
        }
        if let Some(sources) = self.incoming.get_mut(target) {
            sources.retain(|s| s != source);
        }
        Ok(edge)
    }

    pub fn get_dependency(&self, source: &str, target: &str) -> Option<&DependencyEdge> {
        self.edges.get(&edge_id(source, target))
    }

    /// Outgoing edges: what `id` depends on.
    pub fn dependencies_of(&self, id: &str) -> Vec<&DependencyEdge> {
        self.outgoing
            .get(id)
            .map(|targets| {
                targets
                    .iter()
                    .filter_map(|t| self.edges.get(&edge_id(id, t)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Incoming edges: what depends on `id`.
    pub fn dependents_of(&self, id: &str) -> Vec<&DependencyEdge> {
        self.incoming
            .get(id)
            .map(|sources| {
                sources
                    .iter()
                    .filter_map(|s| self.edges.get(&edge_id(s, id)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Shortest path by BFS over outgoing edges. `None` when unreachable;
    /// a single-element path when `from == to`.
    pub fn find_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            let Some(targets) = self.outgoing.get(current) else {
                continue;
            };
            for target in targets {
                if !visited.insert(target) {
                    continue;
                }
                parents.insert(target, current);
                if target == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = to;
                    while let Some(&parent) = parents.get(cursor) {
                        path.push(parent.to_string());
                        cursor = parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(target);
            }
        }
        None
    }

    /// Services impacted when `id` fails: DFS over incoming edges (its
    /// dependents, transitively) up to `max_depth` hops.
    pub fn get_upstream_impact(&self, id: &str, max_depth: usize) -> Vec<ImpactPath> {
        self.impact(id, max_depth, Direction::Incoming)
    }

    /// Services `id` transitively depends on: DFS over outgoing edges.
    pub fn get_downstream_impact(&self, id: &str, max_depth: usize) -> Vec<ImpactPath> {
        self.impact(id, max_depth, Direction::Outgoing)
    }

    fn impact(&self, id: &str, max_depth: usize, direction: Direction) -> Vec<ImpactPath> {
        if !self.nodes.contains_key(id) {
            return Vec::new();
        }
        let mut visited: HashSet<String> = HashSet::from([id.to_string()]);
        let mut paths = Vec::new();
        let mut current = vec![id.to_string()];
        self.impact_dfs(id, max_depth, direction, &mut visited, &mut current, &mut paths);
        paths
    }

    fn impact_dfs(
        &self,
        current_id: &str,
        remaining: usize,
        direction: Direction,
        visited: &mut HashSet<String>,
        current_path: &mut Vec<String>,
        out: &mut Vec<ImpactPath>,
    ) {
        if remaining == 0 {
            return;
        }
        let neighbours = match direction {
            Direction::Outgoing => self.outgoing.get(current_id),
            Direction::Incoming => self.incoming.get(current_id),
        };
        let Some(neighbours) = neighbours else {
            return;
        };

        for next in neighbours.clone() {
            if !visited.insert(next.clone()) {
                continue;
            }
            current_path.push(next.clone());
            let criticality = self
                .path_criticality(current_path, direction)
                .unwrap_or(EdgeCriticality::Optional);
            out.push(ImpactPath {
                source: current_path[0].clone(),
                affected: next.clone(),
                path: current_path.clone(),
                hops: current_path.len() - 1,
                criticality,
            });
            self.impact_dfs(&next, remaining - 1, direction, visited, current_path, out);
            current_path.pop();
        }
    }

    /// Weakest-link merge: the minimum edge criticality along the path.
    fn path_criticality(
        &self,
        path: &[String],
        direction: Direction,
    ) -> Option<EdgeCriticality> {
        path.windows(2)
            .filter_map(|pair| {
                let (a, b) = (&pair[0], &pair[1]);
                let key = match direction {
                    Direction::Outgoing => edge_id(a, b),
                    // Traversing dependents: the stored edge points the other way.
                    Direction::Incoming => edge_id(b, a),
                };
                self.edges.get(&key).map(|e| e.criticality)
            })
            .min()
    }

    /// Simple cycles found by coloured DFS, each normalized to start at its
    /// lexicographically smallest node.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut colours: HashMap<String, Colour> = self
            .nodes
            .keys()
            .map(|id| (id.clone(), Colour::White))
            .collect();
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut cycles = Vec::new();

        let mut roots: Vec<String> = self.nodes.keys().cloned().collect();
        roots.sort();

        for root in roots {
            if colours[&root] != Colour::White {
                continue;
            }
            let mut stack: Vec<String> = Vec::new();
            self.cycle_dfs(&root, &mut colours, &mut stack, &mut seen, &mut cycles);
        }
        cycles
    }

    fn cycle_dfs(
        &self,
        node: &str,
        colours: &mut HashMap<String, Colour>,
        stack: &mut Vec<String>,
        seen: &mut HashSet<Vec<String>>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        colours.insert(node.to_string(), Colour::Grey);
        stack.push(node.to_string());

        if let Some(targets) = self.outgoing.get(node) {
            for target in targets.clone() {
                match colours.get(&target).copied() {
                    Some(Colour::Grey) => {
                        if let Some(pos) = stack.iter().position(|n| *n == target) {
                            let cycle = normalize_cycle(&stack[pos..]);
                            if seen.insert(cycle.clone()) {
                                cycles.push(cycle);
                            }
                        }
                    }
                    Some(Colour::White) => {
                        self.cycle_dfs(&target, colours, stack, seen, cycles);
                    }
                    _ => {}
                }
            }
        }

        stack.pop();
        colours.insert(node.to_string(), Colour::Black);
    }

    /// Lossless serialization, nodes and edges in stable id order.
    pub fn to_json(&self) -> Result<String, GraphError> {
        let mut nodes: Vec<ServiceNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<DependencyEdge> = self.edges.values().cloned().collect();
        edges.sort_by_key(|e| e.id());

        serde_json::to_string_pretty(&GraphDocument { nodes, edges })
            .map_err(|err| GraphError::Serde(err.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        let document: GraphDocument =
            serde_json::from_str(text).map_err(|err| GraphError::Serde(err.to_string()))?;
        let mut graph = Self::new();
        for node in document.nodes {
            // Direct insert preserves the serialized timestamps.
            graph.outgoing.entry(node.id.clone()).or_default();
            graph.incoming.entry(node.id.clone()).or_default();
            graph.nodes.insert(node.id.clone(), node);
        }
        for edge in document.edges {
            if !graph.nodes.contains_key(&edge.source) || !graph.nodes.contains_key(&edge.target) {
                tracing::warn!(edge = %edge.id(), "skipping edge with missing endpoint");
                continue;
            }
            let id = edge.id();
            if graph.edges.insert(id, edge.clone()).is_none() {
                graph
                    .outgoing
                    .entry(edge.source.clone())
                    .or_default()
                    .push(edge.target.clone());
                graph
                    .incoming
                    .entry(edge.target.clone())
                    .or_default()
                    .push(edge.source.clone());
            }
        }
        Ok(graph)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Clone, Copy, PartialEq)]
enum Colour {
    White,
    Grey,
    Black,
}

fn normalize_cycle(cycle: &[String]) -> Vec<String> {
    if cycle.is_empty() {
        return Vec::new();
    }
    let smallest = cycle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated = Vec::with_capacity(cycle.len());
    rotated.extend_from_slice(&cycle[smallest..]);
    rotated.extend_from_slice(&cycle[..smallest]);
    rotated
}
