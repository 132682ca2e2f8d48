//! Provider subsystem for model inference backends.
//!
//! Each provider implements the [`Provider`] trait defined in [`traits`] and is
//! registered in the factory function [`create_provider`] by its canonical
//! string key. Every supported backend speaks the OpenAI-compatible
//! chat-completions API, so they share [`compatible::OpenAiCompatibleProvider`].

pub mod compatible;
pub mod traits;

pub use compatible::OpenAiCompatibleProvider;
pub use traits::{ChatMessage, Provider};

use std::sync::Arc;
use std::time::Duration;

const MAX_API_ERROR_CHARS: usize = 200;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub known secret-like token prefixes from provider error strings.
///
/// Redacts tokens with prefixes like `sk-` (OpenAI), `gsk_` (Groq) and `xai-`.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 3] = ["sk-", "gsk_", "xai-"];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            if end == content_start {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &scrubbed[..end])
}

/// Build a sanitized provider error from a failed HTTP response.
pub async fn api_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
    let sanitized = sanitize_api_error(&body);
    anyhow::anyhow!("{provider} API error ({status}): {sanitized}")
}

/// Resolve API key for a provider from config and environment variables.
fn resolve_provider_credential(name: &str, credential_override: Option<&str>) -> Option<String> {
    if let Some(raw_override) = credential_override {
        let trimmed_override = raw_override.trim();
        if !trimmed_override.is_empty() {
            return Some(trimmed_override.to_owned());
        }
    }

    let provider_env_candidates: Vec<&str> = match name {
        "openai" => vec!["OPENAI_API_KEY"],
        "groq" => vec!["GROQ_API_KEY"],
        _ => vec![],
    };

    for env_var in provider_env_candidates
        .into_iter()
        .chain(["PRDGEN_API_KEY", "API_KEY"])
    {
        if let Ok(value) = std::env::var(env_var) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

/// Factory: create the right provider from config.
///
/// `api_url` overrides the provider's default base URL. `custom:<url>` names an
/// arbitrary OpenAI-compatible endpoint.
pub fn create_provider(
    name: &str,
    api_key: Option<&str>,
    api_url: Option<&str>,
    timeout: Duration,
) -> anyhow::Result<Arc<dyn Provider>> {
    let key = resolve_provider_credential(name, api_key);
    let key = key.as_deref();
    let url_override = api_url.map(str::trim).filter(|u| !u.is_empty());

    match name {
        "openai" => Ok(Arc::new(OpenAiCompatibleProvider::with_timeout(
            "openai",
            url_override.unwrap_or(OPENAI_BASE_URL),
            key,
            timeout,
        ))),
        "groq" => Ok(Arc::new(OpenAiCompatibleProvider::with_timeout(
            "groq",
            url_override.unwrap_or(GROQ_BASE_URL),
            key,
            timeout,
        ))),
        custom if custom.starts_with("custom:") => {
            let base_url = custom.trim_start_matches("custom:").trim();
            if reqwest::Url::parse(base_url).is_err() {
                anyhow::bail!("Invalid custom provider URL: {base_url:?}");
            }
            Ok(Arc::new(OpenAiCompatibleProvider::with_timeout(
                "custom", base_url, key, timeout,
            )))
        }
        _ => anyhow::bail!(
            "Unknown provider: {name}. Supported: \"openai\", \"groq\", \"custom:<URL>\"."
        ),
    }
}

/// Information about a supported provider for display purposes.
pub struct ProviderInfo {
    /// Canonical name used in config (e.g. `"openai"`)
    pub name: &'static str,
    /// Human-readable display name
    pub display_name: &'static str,
    /// Default base URL
    pub base_url: &'static str,
}

/// Return the list of all known providers for display in `prdgen providers`.
pub fn list_providers() -> Vec<ProviderInfo> {
    vec![
        ProviderInfo {
            name: "openai",
            display_name: "OpenAI",
            base_url: OPENAI_BASE_URL,
        },
        ProviderInfo {
            name: "groq",
            display_name: "Groq",
            base_url: GROQ_BASE_URL,
        },
    ]
}
