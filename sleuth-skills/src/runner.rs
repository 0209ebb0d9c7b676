use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use sleuth_approval::{classify_risk, ApprovalProtocol};
use sleuth_core::mutation::MutationRequest;
use sleuth_core::tool::ToolSet;

use crate::{Recipe, RecipeStep, SkillError};

/// Outcome of one recipe step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub tool: String,
    pub executed: bool,
    /// Approval result for mutating steps, absent for read-only ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Executes recipes step by step. Mutating steps pass through the approval
/// protocol; a rejection or step failure aborts the remainder of the recipe.
pub struct SkillRunner {
    tools: ToolSet,
    approvals: Arc<ApprovalProtocol>,
}

impl SkillRunner {
    pub fn new(tools: ToolSet, approvals: Arc<ApprovalProtocol>) -> Self {
        Self { tools, approvals }
    }

    pub async fn run(&self, recipe: &Recipe) -> Result<Vec<StepOutcome>, SkillError> {
        tracing::info!(
            recipe = %recipe.metadata.name,
            steps = recipe.metadata.steps.len(),
            "running remediation recipe"
        );

        let mut outcomes = Vec::with_capacity(recipe.metadata.steps.len());
        for step in &recipe.metadata.steps {
            let outcome = self.run_step(recipe, step).await?;
            let stop = !outcome.executed || outcome.error.is_some();
            outcomes.push(outcome);
            if stop {
                tracing::warn!(
                    recipe = %recipe.metadata.name,
                    step = %step.name,
                    "recipe aborted"
                );
                break;
            }
        }
        Ok(outcomes)
    }

    async fn run_step(&self, recipe: &Recipe, step: &RecipeStep) -> Result<StepOutcome, SkillError> {
        let Some(tool) = self.tools.get(&step.tool) else {
            return Err(SkillError::ToolMissing {
                step: step.name.clone(),
                tool: step.tool.clone(),
            });
        };

        if step.mutating {
            let operation = step.operation.clone().unwrap_or_else(|| step.tool.clone());
            let resource = step
                .resource
                .clone()
                .or_else(|| recipe.metadata.services.first().cloned())
                .unwrap_or_else(|| "unspecified".to_string());
            let request = MutationRequest {
                id: format!("mut_{}", Uuid::new_v4().simple()),
                operation: operation.clone(),
                resource,
                description: format!("{}: {}", recipe.metadata.name, step.name),
                parameters: step.args.clone(),
                risk_level: classify_risk(&operation, step.resource.as_deref().unwrap_or("")),
                rollback_command: step.rollback.clone(),
                estimated_impact: None,
            };

            let outcome = self.approvals.request_approval(&request).await?;
            if !outcome.approved() {
                return Ok(StepOutcome {
                    step: step.name.clone(),
                    tool: step.tool.clone(),
                    executed: false,
                    approved: Some(false),
                    result: None,
                    error: None,
                });
            }

            return Ok(match tool.execute(step.args.clone()).await {
                Ok(result) => StepOutcome {
                    step: step.name.clone(),
                    tool: step.tool.clone(),
                    executed: true,
                    approved: Some(true),
                    result: Some(result),
                    error: None,
                },
                Err(err) => StepOutcome {
                    step: step.name.clone(),
                    tool: step.tool.clone(),
                    executed: true,
                    approved: Some(true),
                    result: None,
                    error: Some(err.to_string()),
                },
            });
        }

        Ok(match tool.execute(step.args.clone()).await {
            Ok(result) => StepOutcome {
                step: step.name.clone(),
                tool: step.tool.clone(),
                executed: true,
                approved: None,
                result: Some(result),
                error: None,
            },
            Err(err) => StepOutcome {
                step: step.name.clone(),
                tool: step.tool.clone(),
                executed: true,
                approved: None,
                result: None,
                error: Some(err.to_string()),
            },
        })
    }
}
