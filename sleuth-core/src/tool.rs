use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Specification of a tool available to the investigation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema-like parameter description forwarded to the LLM verbatim.
    pub parameters_schema: serde_json::Value,
}

/// A concrete, parameterized tool invocation. The engine treats arguments and
/// results as opaque JSON; only the summarizer inspects result shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }

    /// Stable dedup key across planners: tool name plus canonically
    /// serialized arguments.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.tool, self.args)
    }
}

/// A provider-backed tool. Adapters for cloud APIs, Kubernetes, metrics
/// backends and the like all implement this seam.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Named collection of tools handed to the state machine.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.spec().name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}
