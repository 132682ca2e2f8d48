//! Prompt templates: named text blueprints with declared variables.

pub mod file;
pub mod traits;

pub use file::{bundled_template, FileTemplateLoader, BUNDLED_TEMPLATE_NAME};
pub use traits::{PromptTemplate, TemplateLoader};

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::GenerateError;

/// Templates held in memory, keyed by name.
#[derive(Default)]
pub struct InMemoryTemplateLoader {
    templates: RwLock<HashMap<String, PromptTemplate>>,
}

impl InMemoryTemplateLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, text: &str) {
        self.templates
            .write()
            .insert(name.to_string(), PromptTemplate::parse(name, text));
    }

    pub fn with_template(self, name: &str, text: &str) -> Self {
        self.insert(name, text);
        self
    }
}

#[async_trait]
impl TemplateLoader for InMemoryTemplateLoader {
    async fn load(&self, name: &str) -> Result<PromptTemplate, GenerateError> {
        self.templates
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| GenerateError::MissingTemplate(name.to_string()))
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

/// Factory: file loader rooted at the resolved templates directory.
pub fn create_template_loader(dir: &Path) -> Arc<dyn TemplateLoader> {
    Arc::new(FileTemplateLoader::new(dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_loader_serves_inserted_templates() {
        let loader = InMemoryTemplateLoader::new().with_template("t", "Hi {name}");
        let template = loader.load("t").await.unwrap();
        assert_eq!(template.variables(), ["name".to_string()]);
        assert!(matches!(
            loader.load("other").await,
            Err(GenerateError::MissingTemplate(_))
        ));
    }

    #[test]
    fn factory_builds_file_loader() {
        let loader = create_template_loader(Path::new("/tmp/prdgen-templates"));
        assert_eq!(loader.name(), "file");
    }
}
