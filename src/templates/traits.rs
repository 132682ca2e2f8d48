//! Prompt template types and the loader trait.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::GenerateError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A text blueprint with named `{placeholder}` variables.
///
/// `{{` and `}}` produce literal braces. A brace pair that does not enclose an
/// identifier (`[A-Za-z_][A-Za-z0-9_]*`) is kept as literal text, so JSON
/// examples can appear in a template unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    text: String,
    segments: Vec<Segment>,
    variables: Vec<String>,
}

fn is_identifier(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(pos) = rest.find(['{', '}']) {
        literal.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            literal.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            literal.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('{') {
            if let Some(close) = tail[1..].find('}') {
                let candidate = &tail[1..=close];
                if is_identifier(candidate) {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable(candidate.to_string()));
                    rest = &tail[close + 2..];
                    continue;
                }
            }
        }

        literal.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

impl PromptTemplate {
    pub fn parse(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let segments = parse_segments(&text);

        let mut variables: Vec<String> = Vec::new();
        for segment in &segments {
            if let Segment::Variable(var) = segment {
                if !variables.iter().any(|v| v == var) {
                    variables.push(var.clone());
                }
            }
        }

        Self {
            name: name.into(),
            text,
            segments,
            variables,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw template text as loaded.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Declared variables in first-appearance order, without duplicates.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn declares(&self, variable: &str) -> bool {
        self.variables.iter().any(|v| v == variable)
    }

    /// Fill every placeholder from `fields`. Fails on the first declared
    /// variable that has no value; extra fields are ignored.
    pub fn fill(&self, fields: &HashMap<String, String>) -> Result<String, GenerateError> {
        if let Some(missing) = self.variables.iter().find(|v| !fields.contains_key(*v)) {
            return Err(GenerateError::MissingVariable {
                template: self.name.clone(),
                variable: missing.clone(),
            });
        }

        let mut output = String::with_capacity(self.text.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Variable(var) => {
                    if let Some(value) = fields.get(var) {
                        output.push_str(value);
                    }
                }
            }
        }
        Ok(output)
    }
}

/// Source of named prompt templates.
#[async_trait]
pub trait TemplateLoader: Send + Sync {
    /// Load a template by name. Fails with `MissingTemplate` when unknown.
    async fn load(&self, name: &str) -> Result<PromptTemplate, GenerateError>;

    /// The name of this loader implementation.
    fn name(&self) -> &str;
}
