use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::metadata::parse_recipe_file;
use crate::{Recipe, SkillError};

/// Registry of remediation recipes loaded from configured directories.
pub struct RecipeRegistry {
    recipes: HashMap<String, Recipe>,
    recipe_dirs: Vec<PathBuf>,
}

impl RecipeRegistry {
    pub fn new(recipe_dirs: Vec<PathBuf>) -> Self {
        Self {
            recipes: HashMap::new(),
            recipe_dirs,
        }
    }

    /// Scan all configured directories for SKILL.md files. Malformed files
    /// are logged and skipped.
    pub async fn scan(&mut self) -> Result<usize, SkillError> {
        let mut count = 0;
        for dir in self.recipe_dirs.clone() {
            if !dir.exists() {
                warn!(dir = %dir.display(), "recipe directory does not exist, skipping");
                continue;
            }
            count += self.scan_directory(&dir).await?;
        }
        info!(recipe_count = count, "recipe registry scan complete");
        Ok(count)
    }

    async fn scan_directory(&mut self, dir: &Path) -> Result<usize, SkillError> {
        let mut count = 0;
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let recipe_file = if path.is_dir() {
                path.join("SKILL.md")
            } else if path.file_name().and_then(|n| n.to_str()) == Some("SKILL.md") {
                path.clone()
            } else {
                continue;
            };
            if !recipe_file.exists() {
                continue;
            }
            match self.load_recipe(&recipe_file).await {
                Ok(name) => {
                    info!(recipe = %name, path = %recipe_file.display(), "loaded recipe");
                    count += 1;
                }
                Err(err) => {
                    warn!(
                        path = %recipe_file.display(),
                        error = %err,
                        "failed to load recipe"
                    );
                }
            }
        }
        Ok(count)
    }

    async fn load_recipe(&mut self, recipe_file: &Path) -> Result<String, SkillError> {
        let content = tokio::fs::read_to_string(recipe_file)
            .await
            .map_err(|err| SkillError::ReadError(format!("{}: {err}", recipe_file.display())))?;
        let (metadata, instructions) = parse_recipe_file(&content)?;
        let name = metadata.name.clone();
        self.recipes.insert(
            name.clone(),
            Recipe {
                metadata,
                instructions,
                path: recipe_file.to_path_buf(),
            },
        );
        Ok(name)
    }

    pub fn get(&self, name: &str) -> Option<&Recipe> {
        self.recipes.get(name)
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Best recipe for a confirmed root cause: score by category keywords
    /// found in the statement plus overlap with the impacted services.
    pub fn find_for_root_cause(&self, root_cause: &str, services: &[String]) -> Option<&Recipe> {
        let statement = root_cause.to_lowercase();
        let mut best: Option<(usize, &Recipe)> = None;

        let mut candidates: Vec<&Recipe> = self.recipes.values().collect();
        candidates.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

        for recipe in candidates {
            let category_hits = recipe
                .metadata
                .categories
                .iter()
                .filter(|c| statement.contains(&c.to_lowercase()))
                .count();
            let service_hits = recipe
                .metadata
                .services
                .iter()
                .filter(|s| services.contains(s))
                .count();
            let score = category_hits * 2 + service_hits;
            if score == 0 {
                continue;
            }
            if best.map(|(s, _)| score > s).unwrap_or(true) {
                best = Some((score, recipe));
            }
        }
        best.map(|(_, recipe)| recipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_recipe(dir: &Path, sub: &str, content: &str) {
        let recipe_dir = dir.join(sub);
        tokio::fs::create_dir_all(&recipe_dir).await.unwrap();
        tokio::fs::write(recipe_dir.join("SKILL.md"), content)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn scan_loads_valid_and_skips_malformed() {
        let dir = tempfile::tempdir().unwrap();
        write_recipe(
            dir.path(),
            "restart",
            "---\nname: restart-workers\ncategories: [\"memory\"]\nservices: [\"payments-api\"]\n---\nbody",
        )
        .await;
        write_recipe(dir.path(), "broken", "no frontmatter here").await;

        let mut registry = RecipeRegistry::new(vec![dir.path().to_path_buf()]);
        let count = registry.scan().await.unwrap();
        assert_eq!(count, 1);
        assert!(registry.get("restart-workers").is_some());
    }

    #[tokio::test]
    async fn missing_directory_is_not_fatal() {
        let mut registry = RecipeRegistry::new(vec![PathBuf::from("/definitely/not/here")]);
        assert_eq!(registry.scan().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn find_for_root_cause_prefers_category_and_service_overlap() {
        let dir = tempfile::tempdir().unwrap();
        write_recipe(
            dir.path(),
            "a",
            "---\nname: generic-restart\ncategories: [\"restart\"]\n---\nbody",
        )
        .await;
        write_recipe(
            dir.path(),
            "b",
            "---\nname: payments-memory\ncategories: [\"memory\"]\nservices: [\"payments-api\"]\n---\nbody",
        )
        .await;

        let mut registry = RecipeRegistry::new(vec![dir.path().to_path_buf()]);
        registry.scan().await.unwrap();

        let found = registry
            .find_for_root_cause(
                "memory leak in payments-api worker pool",
                &["payments-api".to_string()],
            )
            .expect("match");
        assert_eq!(found.metadata.name, "payments-memory");

        assert!(registry
            .find_for_root_cause("dns outage upstream", &[])
            .is_none());
    }
}
