use sleuth_graph::{
    DependencyEdge, EdgeCriticality, ServiceGraph, ServiceNode, ServiceTier, ServiceType,
};

fn service(id: &str) -> ServiceNode {
    ServiceNode::new(id, id, ServiceType::Service)
}

fn build(edges: &[(&str, &str, EdgeCriticality)]) -> ServiceGraph {
    let mut graph = ServiceGraph::new();
    for (source, target, _) in edges {
        if graph.get_service(source).is_none() {
            graph.add_service(service(source));
        }
        if graph.get_service(target).is_none() {
            graph.add_service(service(target));
        }
    }
    for (source, target, criticality) in edges {
        graph
            .add_dependency(DependencyEdge::new(
                *source,
                *target,
                "sync_api",
                *criticality,
            ))
            .unwrap();
    }
    graph
}

#[test]
fn cycle_detection_finds_the_triangle_once() {
    let mut graph = build(&[
        ("a", "b", EdgeCriticality::Critical),
        ("b", "c", EdgeCriticality::Critical),
        ("c", "a", EdgeCriticality::Critical),
    ]);

    let cycles = graph.detect_cycles();
    assert_eq!(cycles.len(), 1);
    let cycle = &cycles[0];
    assert_eq!(cycle.len(), 3);
    for node in ["a", "b", "c"] {
        assert!(cycle.iter().any(|n| n == node), "cycle missing {node}");
    }

    // A dangling edge with no back-path leaves the cycle set unchanged.
    graph.add_service(service("d"));
    graph
        .add_dependency(DependencyEdge::new("a", "d", "sync_api", EdgeCriticality::Optional))
        .unwrap();
    assert_eq!(graph.detect_cycles().len(), 1);
}

#[test]
fn shortest_path_with_tie_break() {
    let graph = build(&[
        ("a", "b", EdgeCriticality::Critical),
        ("b", "c", EdgeCriticality::Critical),
        ("a", "d", EdgeCriticality::Critical),
        ("d", "c", EdgeCriticality::Critical),
    ]);

    let path = graph.find_path("a", "c").expect("a reaches c");
    assert_eq!(path.len(), 3);
    assert_eq!(path[0], "a");
    assert_eq!(path[2], "c");
    assert!(path[1] == "b" || path[1] == "d", "unexpected middle: {}", path[1]);

    assert_eq!(graph.find_path("c", "a"), None);
    assert_eq!(graph.find_path("a", "a"), Some(vec!["a".to_string()]));
}

#[test]
fn downstream_impact_merges_criticality_along_the_path() {
    let graph = build(&[
        ("a", "b", EdgeCriticality::Critical),
        ("b", "c", EdgeCriticality::Degraded),
        ("c", "d", EdgeCriticality::Critical),
    ]);

    let impacts = graph.get_downstream_impact("a", 10);
    let d_impact = impacts
        .iter()
        .find(|i| i.affected == "d")
        .expect("d reachable from a");

    assert_eq!(d_impact.path, vec!["a", "b", "c", "d"]);
    assert_eq!(d_impact.hops, 3);
    assert_eq!(d_impact.criticality, EdgeCriticality::Degraded);

    // Property: the merged criticality equals the minimum along the stored path.
    for impact in &impacts {
        let min = impact
            .path
            .windows(2)
            .map(|w| graph.get_dependency(&w[0], &w[1]).unwrap().criticality)
            .min()
            .unwrap();
        assert_eq!(impact.criticality, min);
    }
}

#[test]
fn json_round_trip_is_observationally_equal() {
    let mut graph = build(&[
        ("web", "api", EdgeCriticality::Critical),
        ("api", "db", EdgeCriticality::Degraded),
    ]);
    graph.add_service(
        ServiceNode::new("cache", "redis-main", ServiceType::Cache)
            .with_team("platform")
            .with_tier(ServiceTier::High)
            .with_tags(vec!["shared".into()]),
    );

    let encoded = graph.to_json().unwrap();
    let decoded = ServiceGraph::from_json(&encoded).unwrap();

    assert_eq!(decoded.node_count(), graph.node_count());
    assert_eq!(decoded.edge_count(), graph.edge_count());

    let original = graph.get_service("cache").unwrap();
    let restored = decoded.get_service("cache").unwrap();
    assert_eq!(restored.name, original.name);
    assert_eq!(restored.team, original.team);
    assert_eq!(restored.tier, original.tier);
    assert_eq!(restored.created_at, original.created_at);
    assert_eq!(restored.updated_at, original.updated_at);

    let original_edge = graph.get_dependency("api", "db").unwrap();
    let restored_edge = decoded.get_dependency("api", "db").unwrap();
    assert_eq!(restored_edge.criticality, original_edge.criticality);
    assert_eq!(restored_edge.created_at, original_edge.created_at);

    // Behaviour is preserved too, not just the records.
    assert_eq!(
        decoded.find_path("web", "db"),
        Some(vec!["web".to_string(), "api".to_string(), "db".to_string()])
    );
}

#[test]
fn removing_a_service_leaves_no_dangling_references() {
    let mut graph = build(&[
        ("u", "v", EdgeCriticality::Critical),
        ("v", "w", EdgeCriticality::Critical),
        ("w", "u", EdgeCriticality::Optional),
    ]);

    graph.remove_service("u").unwrap();

    let encoded = graph.to_json().unwrap();
    assert!(!encoded.contains("\"u\""), "serialized graph still references u");
    assert!(graph.dependents_of("v").is_empty());
    assert!(graph.dependencies_of("w").is_empty());
    assert!(graph.find_path("v", "u").is_none());
}

#[test]
fn repeated_identical_add_dependency_is_a_no_op() {
    let mut graph = build(&[("a", "b", EdgeCriticality::Critical)]);
    for _ in 0..3 {
        graph
            .add_dependency(DependencyEdge::new("a", "b", "sync_api", EdgeCriticality::Critical))
            .unwrap();
    }
    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.dependencies_of("a").len(), 1);
    assert_eq!(graph.dependents_of("b").len(), 1);
}
