//! Declarative remediation recipes.
//!
//! A recipe is a `SKILL.md` file: YAML frontmatter naming the recipe, its
//! trigger facets (categories, services) and an ordered step list, followed
//! by free-form operator instructions. The registry scans configured
//! directories; the runner executes steps, routing every mutating step
//! through the approval protocol.

mod metadata;
mod registry;
mod runner;

pub use metadata::{parse_recipe_file, RecipeMetadata, RecipeStep};
pub use registry::RecipeRegistry;
pub use runner::{SkillRunner, StepOutcome};

use std::path::PathBuf;

/// A loaded recipe: metadata + instruction body + source path.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub metadata: RecipeMetadata,
    pub instructions: String,
    pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("recipe not found: {0}")]
    NotFound(String),

    #[error("failed to read recipe file: {0}")]
    ReadError(String),

    #[error("failed to parse frontmatter: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("step '{step}' references unknown tool {tool}")]
    ToolMissing { step: String, tool: String },

    #[error("approval failed: {0}")]
    Approval(#[from] sleuth_approval::ApprovalError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
