//! Filesystem-backed template loader with a bundled fallback.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::traits::{PromptTemplate, TemplateLoader};
use crate::error::GenerateError;

/// Name of the bundled product-requirements template.
pub const BUNDLED_TEMPLATE_NAME: &str = "prd";

const BUNDLED_PRD_TEMPLATE: &str = include_str!("../../templates/prd.txt");

/// Loads `<dir>/<name>.txt`. The bundled `prd` template is served when no
/// file overrides it.
pub struct FileTemplateLoader {
    dir: PathBuf,
}

impl FileTemplateLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn template_path(&self, name: &str) -> Option<PathBuf> {
        if !is_safe_template_name(name) {
            return None;
        }
        Some(self.dir.join(format!("{name}.txt")))
    }
}

fn is_safe_template_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// The template compiled into the binary, if `name` refers to one.
pub fn bundled_template(name: &str) -> Option<PromptTemplate> {
    (name == BUNDLED_TEMPLATE_NAME)
        .then(|| PromptTemplate::parse(BUNDLED_TEMPLATE_NAME, BUNDLED_PRD_TEMPLATE.trim()))
}

#[async_trait]
impl TemplateLoader for FileTemplateLoader {
    async fn load(&self, name: &str) -> Result<PromptTemplate, GenerateError> {
        let Some(path) = self.template_path(name) else {
            tracing::warn!(template = name, "Rejected unsafe template name");
            return Err(GenerateError::MissingTemplate(name.to_string()));
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                tracing::debug!(template = name, path = %path.display(), "Template loaded");
                Ok(PromptTemplate::parse(name, text.trim()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => bundled_template(name)
                .ok_or_else(|| {
                    tracing::warn!(template = name, path = %path.display(), "Template file not found");
                    GenerateError::MissingTemplate(name.to_string())
                }),
            Err(e) => {
                tracing::error!(template = name, path = %path.display(), "Failed to read template: {e}");
                Err(GenerateError::MissingTemplate(name.to_string()))
            }
        }
    }

    fn name(&self) -> &str {
        "file"
    }
}
