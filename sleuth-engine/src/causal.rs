//! Map a hypothesis statement to a ranked list of targeted tool invocations.
//!
//! A built-in catalog of failure patterns (latency, error rate, memory, CPU,
//! connectivity, deployment, database, scaling) contributes pre-parameterized
//! invocations; unmatched statements fall back to three generic exploratory
//! queries. Over-broad queries are detected and refined from context.

use std::collections::HashSet;

use serde_json::json;

use sleuth_core::tool::ToolInvocation;

/// One candidate query with its pattern relevance.
#[derive(Debug, Clone)]
pub struct CausalQuery {
    pub invocation: ToolInvocation,
    pub relevance: f64,
}

/// Defaults injected into over-broad queries.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub service: Option<String>,
    pub error_type: Option<String>,
    pub time_range: Option<String>,
}

struct FailurePattern {
    keywords: &'static [&'static str],
    build: fn() -> Vec<CausalQuery>,
}

fn query(tool: &str, args: serde_json::Value, relevance: f64) -> CausalQuery {
    CausalQuery {
        invocation: ToolInvocation::new(tool, args),
        relevance,
    }
}

const PATTERNS: &[FailurePattern] = &[
    FailurePattern {
        keywords: &["latency", "slow", "p99", "p95", "response time"],
        build: || {
            vec![
                query("get_metrics", json!({"metric": "p99_latency_ms", "stat": "p99"}), 0.9),
                query("search_logs", json!({"filter": "timeout OR slow"}), 0.7),
                query("get_triggered_monitors", json!({"category": "latency"}), 0.6),
            ]
        },
    },
    FailurePattern {
        keywords: &["error rate", "5xx", "errors", "exception", "failing"],
        build: || {
            vec![
                query("get_metrics", json!({"metric": "error_rate", "stat": "sum"}), 0.9),
                query("search_logs", json!({"filter": "ERROR OR Exception"}), 0.85),
                query("describe_alarms", json!({"state": "ALARM"}), 0.6),
            ]
        },
    },
    FailurePattern {
        keywords: &["memory", "oom", "leak", "heap"],
        build: || {
            vec![
                query("get_metrics", json!({"metric": "memory_utilization", "stat": "max"}), 0.9),
                query("search_logs", json!({"filter": "OutOfMemory OR oom-killer"}), 0.8),
                query("get_service_health", json!({"include": "restarts"}), 0.5),
            ]
        },
    },
    FailurePattern {
        keywords: &["cpu", "throttl", "saturat", "load average"],
        build: || {
            vec![
                query("get_metrics", json!({"metric": "cpu_utilization", "stat": "max"}), 0.9),
                query("get_metrics", json!({"metric": "throttle_count", "stat": "sum"}), 0.7),
            ]
        },
    },
    FailurePattern {
        keywords: &["connect", "network", "dns", "unreachable", "refused"],
        build: || {
            vec![
                query("check_connectivity", json!({"protocol": "tcp"}), 0.9),
                query("search_logs", json!({"filter": "connection refused OR ECONNREFUSED"}), 0.8),
                query("get_metrics", json!({"metric": "connection_errors", "stat": "sum"}), 0.6),
            ]
        },
    },
    FailurePattern {
        keywords: &["deploy", "release", "rollout", "version"],
        build: || {
            vec![
                query("list_deployments", json!({"window": "-2h"}), 0.9),
                query("search_logs", json!({"filter": "deployment OR rollout"}), 0.5),
            ]
        },
    },
    FailurePattern {
        keywords: &["database", "db", "pool", "query", "deadlock", "replication"],
        build: || {
            vec![
                query("describe_db_instances", json!({"include": "status"}), 0.9),
                query("get_metrics", json!({"metric": "database_connections", "stat": "max"}), 0.85),
                query("search_logs", json!({"filter": "deadlock OR too many connections"}), 0.7),
            ]
        },
    },
    FailurePattern {
        keywords: &["scaling", "autoscal", "capacity", "instances"],
        build: || {
            vec![
                query("get_autoscaling_activity", json!({"window": "-2h"}), 0.9),
                query("get_metrics", json!({"metric": "desired_vs_running", "stat": "avg"}), 0.7),
            ]
        },
    },
];

fn generic_queries() -> Vec<CausalQuery> {
    vec![
        query("describe_alarms", json!({"state": "ALARM"}), 0.5),
        query("search_logs", json!({"filter": "ERROR", "window": "-1h"}), 0.5),
        query("get_triggered_monitors", json!({}), 0.4),
    ]
}

#[derive(Debug, Default)]
pub struct CausalQueryBuilder;

impl CausalQueryBuilder {
    pub fn new() -> Self {
        Self
    }

    /// All queries contributed by patterns matching the statement; three
    /// generic exploratory queries when nothing matches.
    pub fn build_queries(&self, statement: &str) -> Vec<CausalQuery> {
        let lowered = statement.to_lowercase();
        let mut queries = Vec::new();
        for pattern in PATTERNS {
            if pattern.keywords.iter().any(|kw| lowered.contains(kw)) {
                queries.extend((pattern.build)());
            }
        }
        if queries.is_empty() {
            tracing::debug!(statement, "no failure pattern matched, using generic probes");
            return generic_queries();
        }
        queries
    }

    /// A query is too broad when it lacks a filter pattern, a service
    /// scope, or any body at all.
    pub fn is_query_too_broad(&self, invocation: &ToolInvocation) -> bool {
        let Some(args) = invocation.args.as_object() else {
            return true;
        };
        if args.is_empty() {
            return true;
        }
        let has_filter = ["filter", "query", "pattern", "metric"]
            .iter()
            .any(|key| args.contains_key(*key));
        let has_service_scope = ["service", "resource", "cluster", "instance"]
            .iter()
            .any(|key| args.contains_key(*key));
        !has_filter || !has_service_scope
    }

    /// Inject defaults from context into an over-broad query.
    pub fn suggest_refinements(
        &self,
        invocation: &ToolInvocation,
        context: &QueryContext,
    ) -> ToolInvocation {
        let mut args = invocation
            .args
            .as_object()
            .cloned()
            .unwrap_or_default();

        let has_service_scope = ["service", "resource", "cluster", "instance"]
            .iter()
            .any(|key| args.contains_key(*key));
        if !has_service_scope {
            if let Some(ref service) = context.service {
                args.insert("service".into(), json!(service));
            }
        }
        let has_filter = ["filter", "query", "pattern", "metric"]
            .iter()
            .any(|key| args.contains_key(*key));
        if !has_filter {
            if let Some(ref error_type) = context.error_type {
                args.insert("filter".into(), json!(error_type));
            }
        }
        if !args.contains_key("window") && !args.contains_key("time_range") {
            if let Some(ref time_range) = context.time_range {
                args.insert("time_range".into(), json!(time_range));
            }
        }

        ToolInvocation::new(invocation.tool.clone(), serde_json::Value::Object(args))
    }

    /// Merge per-hypothesis query lists into one bounded plan. Input order
    /// is the frontier order (highest priority first); within a hypothesis
    /// queries rank by descending relevance; duplicates collapse.
    pub fn plan(
        &self,
        per_hypothesis: &[Vec<CausalQuery>],
        max_queries: usize,
    ) -> Vec<ToolInvocation> {
        let mut ranked: Vec<(usize, &CausalQuery)> = Vec::new();
        for (plan_priority, queries) in per_hypothesis.iter().enumerate() {
            for query in queries {
                ranked.push((plan_priority, query));
            }
        }
        ranked.sort_by(|(pa, qa), (pb, qb)| {
            pa.cmp(pb).then(
                qb.relevance
                    .partial_cmp(&qa.relevance)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });

        let mut seen = HashSet::new();
        let mut plan = Vec::new();
        for (_, query) in ranked {
            if !seen.insert(query.invocation.dedup_key()) {
                continue;
            }
            plan.push(query.invocation.clone());
            if plan.len() >= max_queries {
                break;
            }
        }
        plan
    }
}
