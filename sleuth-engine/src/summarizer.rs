//! Reduce a raw tool result to a fixed-shape compact summary.
//!
//! Pure: no I/O, no state. This is the only place in the engine that
//! inspects the shape of a tool result payload.

use serde::{Deserialize, Serialize};

/// Health indicator derived from status fields and error keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Critical,
    Unknown,
}

/// One-to-one with a stored tool result while it is live or archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactSummary {
    pub result_id: String,
    pub short_text: String,
    pub services: Vec<String>,
    pub health_status: HealthStatus,
    pub has_errors: bool,
}

const MAX_SHORT_TEXT: usize = 200;

const ERROR_KEYWORDS: &[&str] = &[
    "error",
    "exception",
    "failed",
    "failure",
    "timeout",
    "refused",
    "unavailable",
    "panic",
    "fatal",
    "5xx",
];

const CRITICAL_KEYWORDS: &[&str] = &["critical", "outage", "down", "unreachable", "crashloop"];
const DEGRADED_KEYWORDS: &[&str] = &["degraded", "warning", "elevated", "slow", "throttl"];

const SERVICE_KEYS: &[&str] = &[
    "service",
    "service_name",
    "serviceName",
    "services",
    "resource",
    "cluster",
    "function_name",
    "db_instance",
];

/// Summarize a tool result: extract service identifiers, derive a health
/// indicator, flag errors and produce a short natural-language line.
pub fn summarize(
    result_id: &str,
    tool: &str,
    args: &serde_json::Value,
    result: &serde_json::Value,
) -> CompactSummary {
    let mut services = Vec::new();
    collect_services(args, &mut services);
    collect_services(result, &mut services);
    services.dedup();

    let serialized = result.to_string().to_lowercase();
    let has_errors = explicit_error_flag(result)
        || ERROR_KEYWORDS.iter().any(|kw| serialized.contains(kw));
    let health_status = derive_health(result, &serialized, has_errors);

    let short_text = truncate(&describe(tool, &services, health_status, has_errors, result));

    CompactSummary {
        result_id: result_id.to_string(),
        short_text,
        services,
        health_status,
        has_errors,
    }
}

fn explicit_error_flag(result: &serde_json::Value) -> bool {
    match result {
        serde_json::Value::Object(map) => {
            map.get("error").map(|v| !v.is_null()).unwrap_or(false)
                || map
                    .get("errors")
                    .and_then(|v| v.as_array())
                    .map(|a| !a.is_empty())
                    .unwrap_or(false)
        }
        _ => false,
    }
}

fn derive_health(
    result: &serde_json::Value,
    serialized: &str,
    has_errors: bool,
) -> HealthStatus {
    // An explicit status field wins over keyword probing.
    if let Some(status) = result
        .get("status")
        .or_else(|| result.get("health"))
        .or_else(|| result.get("state"))
        .and_then(|v| v.as_str())
    {
        let status = status.to_lowercase();
        if CRITICAL_KEYWORDS.iter().any(|kw| status.contains(kw)) {
            return HealthStatus::Critical;
        }
        if DEGRADED_KEYWORDS.iter().any(|kw| status.contains(kw)) {
            return HealthStatus::Degraded;
        }
        if ["ok", "healthy", "running", "active", "available"]
            .iter()
            .any(|kw| status.contains(kw))
        {
            return HealthStatus::Ok;
        }
    }

    if CRITICAL_KEYWORDS.iter().any(|kw| serialized.contains(kw)) {
        return HealthStatus::Critical;
    }
    if has_errors || DEGRADED_KEYWORDS.iter().any(|kw| serialized.contains(kw)) {
        return HealthStatus::Degraded;
    }
    HealthStatus::Unknown
}

fn collect_services(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map {
                if SERVICE_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                    match entry {
                        serde_json::Value::String(name) if !name.is_empty() => {
                            push_unique(out, name);
                        }
                        serde_json::Value::Array(names) => {
                            for name in names.iter().filter_map(|n| n.as_str()) {
                                push_unique(out, name);
                            }
                        }
                        _ => {}
                    }
                } else {
                    collect_services(entry, out);
                }
            }
        }
        serde_json::Value::Array(entries) => {
            for entry in entries {
                collect_services(entry, out);
            }
        }
        _ => {}
    }
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|existing| existing == name) {
        out.push(name.to_string());
    }
}

fn describe(
    tool: &str,
    services: &[String],
    health: HealthStatus,
    has_errors: bool,
    result: &serde_json::Value,
) -> String {
    let mut parts = vec![format!("{tool}:")];

    match result {
        serde_json::Value::Array(items) => parts.push(format!("{} items", items.len())),
        serde_json::Value::Object(map) => {
            if let Some(count) = map
                .get("count")
                .or_else(|| map.get("total"))
                .and_then(|v| v.as_u64())
            {
                parts.push(format!("{count} records"));
            }
            if let Some(message) = map.get("message").and_then(|v| v.as_str()) {
                parts.push(message.to_string());
            }
        }
        serde_json::Value::String(text) => parts.push(text.clone()),
        _ => {}
    }

    if !services.is_empty() {
        parts.push(format!("services: {}", services.join(", ")));
    }
    match health {
        HealthStatus::Critical => parts.push("CRITICAL".into()),
        HealthStatus::Degraded => parts.push("degraded".into()),
        _ => {}
    }
    if has_errors && health == HealthStatus::Ok {
        parts.push("errors present".into());
    }
    parts.join(" ")
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_SHORT_TEXT {
        return text.to_string();
    }
    let mut end = MAX_SHORT_TEXT;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_services_from_args_and_result() {
        let summary = summarize(
            "tr_1",
            "get_metrics",
            &serde_json::json!({"service": "payments-api"}),
            &serde_json::json!({"datapoints": [], "resource": "orders-db"}),
        );
        assert_eq!(summary.services, vec!["payments-api", "orders-db"]);
        assert_eq!(summary.result_id, "tr_1");
    }

    #[test]
    fn explicit_status_field_wins() {
        let summary = summarize(
            "tr_2",
            "get_service_health",
            &serde_json::json!({}),
            &serde_json::json!({"status": "degraded", "service": "api"}),
        );
        assert_eq!(summary.health_status, HealthStatus::Degraded);
    }

    #[test]
    fn error_keywords_set_flag_and_health() {
        let summary = summarize(
            "tr_3",
            "search_logs",
            &serde_json::json!({}),
            &serde_json::json!({"lines": ["connection refused by upstream"]}),
        );
        assert!(summary.has_errors);
        assert_eq!(summary.health_status, HealthStatus::Degraded);
    }

    #[test]
    fn critical_keywords_dominate() {
        let summary = summarize(
            "tr_4",
            "describe_alarms",
            &serde_json::json!({}),
            &serde_json::json!({"message": "service outage in us-east-1"}),
        );
        assert_eq!(summary.health_status, HealthStatus::Critical);
    }

    #[test]
    fn clean_result_is_unknown_health_without_errors() {
        let summary = summarize(
            "tr_5",
            "list_deployments",
            &serde_json::json!({}),
            &serde_json::json!({"deployments": [{"id": "d-1"}]}),
        );
        assert!(!summary.has_errors);
        assert_eq!(summary.health_status, HealthStatus::Unknown);
    }

    #[test]
    fn short_text_is_bounded() {
        let long = "x".repeat(500);
        let summary = summarize(
            "tr_6",
            "search_logs",
            &serde_json::json!({}),
            &serde_json::json!({ "message": long }),
        );
        assert!(summary.short_text.len() <= MAX_SHORT_TEXT + 3);
    }
}
