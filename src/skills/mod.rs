//! Skill files and system-prompt composition.
//!
//! A skill is a markdown file giving the agent domain instructions. The
//! orchestrator composes a turn's system prompt from one or more skills with
//! template context injected. [`PromptComposer`] is the boundary trait;
//! [`SkillStore`] is the file-backed implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use crate::error::{Result, TychoError};

/// Marker substituted for template placeholders with no context value.
pub const NOT_AVAILABLE: &str = "[not available]";

const SKILL_SEPARATOR: &str = "\n\n---\n\n";

/// Composes a system prompt from named skills plus template context.
#[async_trait]
pub trait PromptComposer: Send + Sync {
    async fn compose(
        &self,
        skill_names: &[String],
        context: &HashMap<String, String>,
    ) -> Result<String>;
}

/// Listing entry for one skill file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillMeta {
    pub name: String,
    pub title: String,
    pub description: String,
    pub path: PathBuf,
}

/// Directory of markdown skills, one file per skill name.
///
/// Contents are cached after the first read; edits on disk are not picked up
/// until [`SkillStore::clear_cache`].
pub struct SkillStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl SkillStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Raw content of one skill.
    pub async fn load(&self, name: &str) -> Result<String> {
        if let Some(content) = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Ok(content.clone());
        }

        let path = self.dir.join(format!("{name}.md"));
        let content = tokio::fs::read_to_string(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                TychoError::SkillNotFound(name.to_string())
            } else {
                TychoError::Io(err)
            }
        })?;

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), content.clone());
        Ok(content)
    }

    /// Contents of several skills, in the order given.
    pub async fn load_many(&self, names: &[String]) -> Result<Vec<String>> {
        let mut contents = Vec::with_capacity(names.len());
        for name in names {
            contents.push(self.load(name).await?);
        }
        Ok(contents)
    }

    /// All skills in the directory, sorted by name.
    pub async fn list(&self) -> Result<Vec<SkillMeta>> {
        let mut names: Vec<String> = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name.strip_suffix(".md") {
                names.push(name.to_string());
            }
        }
        names.sort();

        let mut metas = Vec::with_capacity(names.len());
        for name in names {
            let content = self.load(&name).await?;
            metas.push(SkillMeta {
                title: extract_title(&content),
                description: extract_description(&content),
                path: self.dir.join(format!("{name}.md")),
                name,
            });
        }
        Ok(metas)
    }

    /// Drop cached contents so the next load re-reads from disk.
    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl PromptComposer for SkillStore {
    async fn compose(
        &self,
        skill_names: &[String],
        context: &HashMap<String, String>,
    ) -> Result<String> {
        let skills = self.load_many(skill_names).await?;
        let combined = skills
            .iter()
            .map(|content| inject_context(content, context))
            .collect::<Vec<_>>()
            .join(SKILL_SEPARATOR);
        Ok(combined)
    }
}

/// Substitute `{{KEY}}` placeholders, then blank out whatever is left.
///
/// Unmatched upper-snake placeholders become [`NOT_AVAILABLE`] so a missing
/// context value never leaks template syntax into the prompt.
fn inject_context(content: &str, context: &HashMap<String, String>) -> String {
    let mut result = content.to_string();
    for (key, value) in context {
        result = result.replace(&format!("{{{{{key}}}}}"), value);
    }

    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{[A-Z_]+\}\}").expect("placeholder pattern compiles"));
    placeholder.replace_all(&result, NOT_AVAILABLE).into_owned()
}

fn extract_title(content: &str) -> String {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    let title = TITLE.get_or_init(|| Regex::new(r"(?m)^#\s+(.+)$").expect("title pattern compiles"));
    title
        .captures(content)
        .map(|captures| captures[1].trim().to_string())
        .unwrap_or_else(|| "Unnamed Skill".to_string())
}

/// First paragraph line after the title heading.
fn extract_description(content: &str) -> String {
    let mut past_title = false;
    for line in content.lines() {
        if line.starts_with("# ") {
            past_title = true;
            continue;
        }
        if past_title && !line.trim().is_empty() && !line.starts_with('#') {
            return line.trim().to_string();
        }
    }
    String::new()
}
