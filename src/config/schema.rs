use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level prdgen configuration, loaded from `config.toml`.
///
/// Resolution order: `PRDGEN_CONFIG_DIR` env (or `--config-dir`) → `~/.prdgen/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Workspace directory - computed from the config dir, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from the config dir, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// API key for the selected provider. Overridden by `PRDGEN_API_KEY` or `API_KEY` env vars.
    pub api_key: Option<String>,
    /// Base URL override for provider API (e.g. "http://10.0.0.1:8000/v1" for a local server)
    pub api_url: Option<String>,
    /// Default provider ID (`"openai"`, `"groq"` or `"custom:<URL>"`). Default: `"openai"`.
    pub default_provider: Option<String>,
    /// Default model routed through the selected provider (e.g. `"gpt-4"`).
    pub default_model: Option<String>,
    /// Default model temperature (0.0–2.0). Default: `0.7`.
    pub default_temperature: f64,

    /// Model call settings (`[provider]`).
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Prompt template location and default (`[templates]`).
    #[serde(default)]
    pub templates: TemplatesConfig,

    /// Session memory policy (`[sessions]`).
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Gateway server configuration: host, port, limits (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Observability backend configuration (`[observability]`).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Provider ─────────────────────────────────────────────────────

/// Model call configuration (`[provider]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProviderConfig {
    /// Upper bound on a single model call, in seconds. Expiry fails the turn. Default: `120`.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_timeout_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Templates ────────────────────────────────────────────────────

/// Prompt template configuration (`[templates]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TemplatesConfig {
    /// Directory holding `<name>.txt` templates. `~` is expanded; relative paths
    /// resolve under the workspace directory. Default: `"templates"`.
    #[serde(default = "default_templates_dir")]
    pub dir: String,
    /// Template used when a request does not name one. Default: `"prd"`.
    #[serde(default = "default_template_name")]
    pub default_template: String,
}

fn default_templates_dir() -> String {
    "templates".into()
}

fn default_template_name() -> String {
    "prd".into()
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: default_templates_dir(),
            default_template: default_template_name(),
        }
    }
}

// ── Sessions ─────────────────────────────────────────────────────

/// Session memory configuration (`[sessions]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionsConfig {
    /// Maximum entries retained per session; oldest are dropped first. `0` disables the cap. Default: `50`.
    #[serde(default = "default_max_history_entries")]
    pub max_history_entries: usize,
    /// Cookie carrying the session id between requests. Default: `"prdgen_session"`.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

fn default_max_history_entries() -> usize {
    50
}

fn default_cookie_name() -> String {
    "prdgen_session".into()
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_history_entries: default_max_history_entries(),
            cookie_name: default_cookie_name(),
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────

/// Gateway server configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    /// Gateway port (default: 8080)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Maximum accepted request body size in bytes. Default: `65536`.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Whole-request timeout in seconds. Default: `180`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_request_timeout_secs() -> u64 {
    180
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ── Observability ─────────────────────────────────────────────────

/// Observability backend configuration (`[observability]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObservabilityConfig {
    /// "none" | "log" | "jsonl"
    pub backend: String,

    /// Trace file path for the `jsonl` backend. Relative paths are resolved under workspace_dir.
    #[serde(default = "default_trace_path")]
    pub trace_path: String,

    /// Newest entries retained in the trace file. `0` keeps everything. Default: `200`.
    #[serde(default = "default_trace_max_entries")]
    pub trace_max_entries: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            backend: "none".into(),
            trace_path: default_trace_path(),
            trace_max_entries: default_trace_max_entries(),
        }
    }
}

fn default_trace_path() -> String {
    "state/traces.jsonl".to_string()
}

fn default_trace_max_entries() -> usize {
    200
}

const SUPPORTED_OBSERVABILITY_BACKENDS: &[&str] = &["none", "log", "jsonl"];

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        let prdgen_dir = home.join(".prdgen");

        Self {
            workspace_dir: prdgen_dir.join("workspace"),
            config_path: prdgen_dir.join("config.toml"),
            api_key: None,
            api_url: None,
            default_provider: Some("openai".to_string()),
            default_model: Some("gpt-4".to_string()),
            default_temperature: 0.7,
            provider: ProviderConfig::default(),
            templates: TemplatesConfig::default(),
            sessions: SessionsConfig::default(),
            gateway: GatewayConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".prdgen"))
}

fn resolve_config_dir() -> Result<(PathBuf, &'static str)> {
    if let Ok(custom_config_dir) = std::env::var("PRDGEN_CONFIG_DIR") {
        let custom_config_dir = custom_config_dir.trim();
        if !custom_config_dir.is_empty() {
            let expanded = shellexpand::tilde(custom_config_dir).into_owned();
            return Ok((PathBuf::from(expanded), "PRDGEN_CONFIG_DIR"));
        }
    }
    Ok((default_config_dir()?, "default"))
}

fn config_dir_creation_error(path: &Path) -> String {
    format!(
        "Failed to create config directory: {}. Set PRDGEN_CONFIG_DIR or pass --config-dir to a writable location.",
        path.display()
    )
}

/// Resolve a configured path: `~` is expanded, relative paths land under `base`.
pub fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(raw.trim()).into_owned());
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

impl Config {
    pub async fn load_or_init() -> Result<Self> {
        let (config_dir, source) = resolve_config_dir()?;
        let config = Self::load_or_init_in(&config_dir).await?;
        tracing::debug!(source, "Config directory resolved");
        Ok(config)
    }

    /// Load `config.toml` from `config_dir`, writing defaults on first run.
    pub async fn load_or_init_in(config_dir: &Path) -> Result<Self> {
        let workspace_dir = config_dir.join("workspace");
        let config_path = config_dir.join("config.toml");

        fs::create_dir_all(config_dir)
            .await
            .with_context(|| config_dir_creation_error(config_dir))?;
        fs::create_dir_all(&workspace_dir)
            .await
            .context("Failed to create workspace directory")?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.workspace_dir = workspace_dir;
            config.save().await?;

            // Restrict permissions on newly created config file (may contain API keys)
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }
            config
        } else {
            // Warn if config file is world-readable (may contain API keys)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            // Set computed paths that are skipped during serialization
            config.config_path = config_path.clone();
            config.workspace_dir = workspace_dir;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            workspace = %config.workspace_dir.display(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Validate configuration values that would cause runtime failures.
    ///
    /// Called after TOML deserialization and env-override application to catch
    /// obviously invalid values early instead of failing at arbitrary runtime points.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            anyhow::bail!(
                "default_temperature must be between 0.0 and 2.0 (got {})",
                self.default_temperature
            );
        }

        // Provider
        if self.provider.timeout_secs == 0 {
            anyhow::bail!("provider.timeout_secs must be greater than 0");
        }

        // Templates
        if self.templates.dir.trim().is_empty() {
            anyhow::bail!("templates.dir must not be empty");
        }
        if self.templates.default_template.trim().is_empty() {
            anyhow::bail!("templates.default_template must not be empty");
        }

        // Sessions
        let cookie = self.sessions.cookie_name.as_str();
        if cookie.is_empty()
            || !cookie
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        {
            anyhow::bail!("sessions.cookie_name must be non-empty and use [A-Za-z0-9_-] only");
        }

        // Gateway
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.max_body_bytes == 0 {
            anyhow::bail!("gateway.max_body_bytes must be greater than 0");
        }
        if self.gateway.request_timeout_secs == 0 {
            anyhow::bail!("gateway.request_timeout_secs must be greater than 0");
        }

        // Observability
        if !SUPPORTED_OBSERVABILITY_BACKENDS.contains(&self.observability.backend.as_str()) {
            anyhow::bail!(
                "observability.backend must be one of {} (got {:?})",
                SUPPORTED_OBSERVABILITY_BACKENDS.join(", "),
                self.observability.backend
            );
        }

        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // API Key: PRDGEN_API_KEY or API_KEY (generic)
        if let Ok(key) = std::env::var("PRDGEN_API_KEY").or_else(|_| std::env::var("API_KEY")) {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }

        if let Ok(provider) = std::env::var("PRDGEN_PROVIDER") {
            if !provider.is_empty() {
                self.default_provider = Some(provider);
            }
        }

        if let Ok(model) = std::env::var("PRDGEN_MODEL") {
            if !model.is_empty() {
                self.default_model = Some(model);
            }
        }

        // Temperature: PRDGEN_TEMPERATURE
        if let Ok(temp_str) = std::env::var("PRDGEN_TEMPERATURE") {
            if let Ok(temp) = temp_str.parse::<f64>() {
                if (0.0..=2.0).contains(&temp) {
                    self.default_temperature = temp;
                }
            }
        }

        // Templates directory: PRDGEN_TEMPLATES_DIR
        if let Ok(dir) = std::env::var("PRDGEN_TEMPLATES_DIR") {
            if !dir.is_empty() {
                self.templates.dir = dir;
            }
        }

        // Gateway port: PRDGEN_GATEWAY_PORT or PORT
        if let Ok(port_str) =
            std::env::var("PRDGEN_GATEWAY_PORT").or_else(|_| std::env::var("PORT"))
        {
            if let Ok(port) = port_str.parse::<u16>() {
                self.gateway.port = port;
            }
        }

        // Gateway host: PRDGEN_GATEWAY_HOST or HOST
        if let Ok(host) = std::env::var("PRDGEN_GATEWAY_HOST").or_else(|_| std::env::var("HOST")) {
            if !host.is_empty() {
                self.gateway.host = host;
            }
        }
    }

    /// Resolved templates directory.
    pub fn templates_dir(&self) -> PathBuf {
        resolve_path(&self.workspace_dir, &self.templates.dir)
    }

    /// Resolved trace file path for the `jsonl` observability backend.
    pub fn trace_path(&self) -> PathBuf {
        resolve_path(&self.workspace_dir, &self.observability.trace_path)
    }

    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));
        let backup_path = parent_dir.join(format!("{file_name}.bak"));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        let had_existing_config = self.config_path.exists();
        if had_existing_config {
            fs::copy(&self.config_path, &backup_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to create config backup before atomic replace: {}",
                        backup_path.display()
                    )
                })?;
        }

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            if had_existing_config && backup_path.exists() {
                fs::copy(&backup_path, &self.config_path)
                    .await
                    .context("Failed to restore config backup")?;
            }
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir).await?;

        if had_existing_config {
            let _ = fs::remove_file(&backup_path).await;
        }

        Ok(())
    }
}

async fn sync_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)
            .await
            .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
