use gray_matter::engine::YAML;
use gray_matter::Matter;
use serde::{Deserialize, Serialize};

use crate::SkillError;

/// Parsed recipe frontmatter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Failure categories this recipe remedies (matched against the
    /// confirmed root cause).
    #[serde(default)]
    pub categories: Vec<String>,
    /// Services this recipe applies to.
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub steps: Vec<RecipeStep>,
}

/// One declarative step. Mutating steps must carry the operation/resource
/// pair used for risk classification and approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeStep {
    pub name: String,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub mutating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<String>,
}

/// Parse a SKILL.md file into metadata + instruction body.
pub fn parse_recipe_file(content: &str) -> Result<(RecipeMetadata, String), SkillError> {
    let matter = Matter::<YAML>::new();
    let parsed = matter.parse(content);

    let data = parsed
        .data
        .ok_or_else(|| SkillError::ParseError("no frontmatter found".into()))?;

    let metadata: RecipeMetadata = data
        .deserialize()
        .map_err(|err| SkillError::ParseError(err.to_string()))?;
    if metadata.name.trim().is_empty() {
        return Err(SkillError::MissingField("name".into()));
    }
    Ok((metadata, parsed.content))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPE_MD: &str = r#"---
name: "restart-payment-workers"
description: "Drain and restart the payment worker fleet"
categories: ["memory", "restart"]
services: ["payments-api"]
steps:
  - name: "check queue depth"
    tool: "get_metrics"
    args:
      metric: "queue_depth"
      service: "payments-api"
  - name: "restart workers"
    tool: "restart_service"
    args:
      service: "payments-api"
    mutating: true
    operation: "restart-service"
    resource: "payments-api"
    rollback: "scale workers back to previous count"
---
# Restart payment workers

Drain in-flight work before restarting.
"#;

    #[test]
    fn parse_full_recipe() {
        let (meta, body) = parse_recipe_file(RECIPE_MD).unwrap();
        assert_eq!(meta.name, "restart-payment-workers");
        assert_eq!(meta.categories, vec!["memory", "restart"]);
        assert_eq!(meta.services, vec!["payments-api"]);
        assert_eq!(meta.steps.len(), 2);

        let first = &meta.steps[0];
        assert_eq!(first.tool, "get_metrics");
        assert!(!first.mutating);
        assert_eq!(first.args["metric"], "queue_depth");

        let second = &meta.steps[1];
        assert!(second.mutating);
        assert_eq!(second.operation.as_deref(), Some("restart-service"));
        assert!(second.rollback.is_some());

        assert!(body.contains("Drain in-flight work"));
    }

    #[test]
    fn parse_minimal_recipe() {
        let content = r#"---
name: "escalate"
---
Page the on-call.
"#;
        let (meta, body) = parse_recipe_file(content).unwrap();
        assert_eq!(meta.name, "escalate");
        assert!(meta.steps.is_empty());
        assert!(body.contains("Page the on-call."));
    }

    #[test]
    fn parse_no_frontmatter_fails() {
        assert!(parse_recipe_file("plain markdown").is_err());
    }

    #[test]
    fn parse_missing_name_fails() {
        let content = r#"---
description: "no name"
---
body
"#;
        assert!(parse_recipe_file(content).is_err());
    }
}
