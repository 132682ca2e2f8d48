#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use prdgen::config::Config;
use prdgen::gateway::api::GenerateRequest;
use prdgen::generation::{structure_document, Generator};
use prdgen::templates::create_template_loader;
use prdgen::{gateway, providers, TemplateCommands};

fn parse_temperature(s: &str) -> std::result::Result<f64, String> {
    let t: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !(0.0..=2.0).contains(&t) {
        return Err("temperature must be between 0.0 and 2.0".to_string());
    }
    Ok(t)
}

fn parse_field(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("field name must not be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    #[value(name = "bash")]
    Bash,
    #[value(name = "fish")]
    Fish,
    #[value(name = "zsh")]
    Zsh,
    #[value(name = "powershell")]
    PowerShell,
    #[value(name = "elvish")]
    Elvish,
}

/// `prdgen` - template-driven product documents from an LLM.
#[derive(Parser, Debug)]
#[command(name = "prdgen")]
#[command(version)]
#[command(about = "Generate product requirement documents from templates and an LLM.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway
    #[command(long_about = "\
Start the HTTP gateway.

Serves POST /generate plus session inspection routes. Bind address \
defaults to the values in your config file (gateway.host / gateway.port).

Examples:
  prdgen serve                  # use config defaults
  prdgen serve -p 8080          # listen on port 8080
  prdgen serve --host 0.0.0.0   # bind to all interfaces
  prdgen serve -p 0             # random available port")]
    Serve {
        /// Port to listen on (use 0 for random available port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Generate one document and print it
    #[command(long_about = "\
Generate one document and print it.

Template fields come from --fields-file (a JSON object) and repeated \
--field KEY=VALUE flags; flags win on conflict.

Examples:
  prdgen generate --field overview=\"A todo app\" --field product_name=Todo ...
  prdgen generate --fields-file request.json --json
  prdgen generate --template brief --field overview=\"Search\" -m \"keep it short\"")]
    Generate {
        /// Template field as KEY=VALUE (repeatable)
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// JSON object of template fields
        #[arg(long)]
        fields_file: Option<PathBuf>,

        /// Template name; defaults to config templates.default_template
        #[arg(long)]
        template: Option<String>,

        /// Free-form human input for templates that declare {human_input}
        #[arg(short, long)]
        message: Option<String>,

        /// Send this prompt verbatim instead of filling a template
        #[arg(long, conflicts_with_all = ["template", "message"])]
        prompt: Option<String>,

        /// Provider to use (openai, groq, custom:<URL>)
        #[arg(long)]
        provider: Option<String>,

        /// Model to use
        #[arg(long)]
        model: Option<String>,

        /// Temperature (0.0 - 2.0)
        #[arg(short, long, value_parser = parse_temperature)]
        temperature: Option<f64>,

        /// Print {session_id, text, document} as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show resolved configuration
    Status,

    /// List supported model providers
    Providers,

    /// Inspect prompt templates
    Templates {
        #[command(subcommand)]
        template_command: TemplateCommands,
    },

    /// Manage configuration
    #[command(long_about = "\
Manage prdgen configuration.

Use 'schema' to dump the full JSON Schema for the config file, which \
documents every available key, type, and default value.

Examples:
  prdgen config schema              # print JSON Schema to stdout
  prdgen config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completion script to stdout
    #[command(long_about = "\
Generate shell completion scripts for `prdgen`.

The script is printed to stdout so it can be sourced directly:

Examples:
  source <(prdgen completions bash)
  prdgen completions zsh > ~/.zfunc/_prdgen
  prdgen completions fish > ~/.config/fish/completions/prdgen.fish")]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var("PRDGEN_CONFIG_DIR", config_dir);
    }

    // Completions must remain stdout-only and should not load config or initialize logging.
    if let Commands::Completions { shell } = &cli.command {
        let mut stdout = std::io::stdout().lock();
        write_shell_completion(*shell, &mut stdout)?;
        return Ok(());
    }

    // Logs go to stderr so `generate --json` output stays machine-readable.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: failed to install tracing subscriber: {e}");
    }

    let config = Config::load_or_init().await?;

    match cli.command {
        Commands::Completions { .. } => Ok(()),

        Commands::Serve { port, host } => {
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            if port == 0 {
                info!("Starting prdgen gateway on {host} (random port)");
            } else {
                info!("Starting prdgen gateway on {host}:{port}");
            }
            gateway::run_gateway(&host, port, config).await
        }

        Commands::Generate {
            fields,
            fields_file,
            template,
            message,
            prompt,
            provider,
            model,
            temperature,
            json,
        } => {
            let mut config = config;
            if let Some(provider) = provider {
                config.default_provider = Some(provider);
            }
            if let Some(model) = model {
                config.default_model = Some(model);
            }
            if let Some(temperature) = temperature {
                config.default_temperature = temperature;
            }

            let mut request = match fields_file {
                Some(path) => load_fields_file(&path).await?,
                None => GenerateRequest::default(),
            };
            request.fields.extend(fields);
            if let Some(template) = template {
                request.template = Some(template);
            }
            if let Some(message) = message {
                request.human_input = message;
            }
            if let Some(prompt) = prompt {
                request.prompt = Some(prompt);
            }

            run_generate(&config, request, json).await
        }

        Commands::Status => {
            println!("prdgen Status");
            println!();
            println!("Version:     {}", env!("CARGO_PKG_VERSION"));
            println!("Workspace:   {}", config.workspace_dir.display());
            println!("Config:      {}", config.config_path.display());
            println!();
            println!(
                "Provider:      {}",
                config.default_provider.as_deref().unwrap_or("openai")
            );
            println!(
                "   Model:      {}",
                config.default_model.as_deref().unwrap_or("(default)")
            );
            println!("   Temperature: {}", config.default_temperature);
            println!("   Timeout:    {}s", config.provider.timeout_secs);
            println!(
                "   API key:    {}",
                if config.api_key.is_some() {
                    "configured"
                } else {
                    "(from environment)"
                }
            );
            println!();
            println!("Templates:     {}", config.templates_dir().display());
            println!("   Default:    {}", config.templates.default_template);
            println!(
                "Sessions:      in-memory (max {} entries, cookie {})",
                if config.sessions.max_history_entries == 0 {
                    "unbounded".to_string()
                } else {
                    config.sessions.max_history_entries.to_string()
                },
                config.sessions.cookie_name
            );
            println!(
                "Gateway:       {}:{}",
                config.gateway.host, config.gateway.port
            );
            println!("Observability: {}", config.observability.backend);
            if config.observability.backend == "jsonl" {
                println!(
                    "   Trace file: {} (keep {})",
                    config.trace_path().display(),
                    config.observability.trace_max_entries
                );
            }
            Ok(())
        }

        Commands::Providers => {
            let providers = providers::list_providers();
            let current = config
                .default_provider
                .as_deref()
                .unwrap_or("openai")
                .trim()
                .to_ascii_lowercase();
            println!("Supported providers ({} total):\n", providers.len());
            println!("  ID (use in config)  DESCRIPTION");
            println!("  ------------------- -----------");
            for p in &providers {
                let marker = if p.name.eq_ignore_ascii_case(&current) {
                    " (active)"
                } else {
                    ""
                };
                println!(
                    "  {:<19} {}{}  [{}]",
                    p.name, p.display_name, marker, p.base_url
                );
            }
            println!("\n  custom:<URL>        Any OpenAI-compatible endpoint");
            Ok(())
        }

        Commands::Templates { template_command } => match template_command {
            TemplateCommands::Show { name } => {
                let loader = create_template_loader(&config.templates_dir());
                let template = loader.load(&name).await?;
                println!("Template:  {}", template.name());
                println!("Variables: {}", template.variables().join(", "));
                println!();
                println!("{}", template.text());
                Ok(())
            }
        },

        Commands::Config { config_command } => match config_command {
            ConfigCommands::Schema => {
                let schema = schemars::schema_for!(Config);
                println!(
                    "{}",
                    serde_json::to_string_pretty(&schema)
                        .context("failed to serialize JSON Schema")?
                );
                Ok(())
            }
        },
    }
}

async fn load_fields_file(path: &std::path::Path) -> Result<GenerateRequest> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read fields file: {}", path.display()))?;
    GenerateRequest::from_json(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid fields file {}: {e}", path.display()))
}

async fn run_generate(config: &Config, request: GenerateRequest, json: bool) -> Result<()> {
    let generator = Generator::from_config(config)?;
    let session_id = generator.begin_or_resume(request.session_id.as_deref());

    let text = match request.raw_prompt() {
        Some(prompt) => generator.run_prompt(&session_id, prompt).await?,
        None => {
            generator
                .run_turn_with(
                    &session_id,
                    request.template.as_deref(),
                    request.fields,
                    &request.human_input,
                )
                .await?
        }
    };

    if json {
        let body = serde_json::json!({
            "session_id": session_id,
            "text": text,
            "document": structure_document(&text),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{text}");
    }
    Ok(())
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name.clone(), writer),
        CompletionShell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, bin_name.clone(), writer);
        }
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }

    writer.flush()?;
    Ok(())
}
