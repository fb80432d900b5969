use crate::cli::ConfigAction;
use crate::config::{self, Config, KeySource, Settings};
use crate::models::{self, ModelAliases};
use crate::provider::{self, Provider};
use anyhow::Context;
use std::io::Write;
use std::path::Path;

fn env_api_key() -> Option<String> {
    std::env::var(config::API_KEY_ENV).ok()
}

pub fn cmd_config(
    action: ConfigAction,
    api_key: Option<String>,
    path: &Path,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Set => {
            let Some(key) = api_key.filter(|k| !k.trim().is_empty()) else {
                anyhow::bail!("`ag config set` needs --api-key <KEY>");
            };
            // Keep any other settings already in the file.
            let mut cfg = Config::load_optional(path)?.unwrap_or_default();
            cfg.api_key = Some(key.trim().to_string());
            cfg.save_atomic(path)?;
            tracing::info!(path = %path.display(), "saved API key");
            writeln!(out, "API key saved to: {}", path.display())?;
        }
        ConfigAction::Get => {
            let cfg = Config::load_optional(path)?;
            match config::lookup_api_key(env_api_key(), cfg.as_ref()) {
                Some((key, source)) => {
                    writeln!(out, "API key: {}", config::mask_key(&key))?;
                    match source {
                        KeySource::Env => writeln!(out, "Source: {} environment variable", config::API_KEY_ENV)?,
                        KeySource::File => writeln!(out, "Source: {}", path.display())?,
                    }
                }
                None => {
                    writeln!(out, "No API key set.")?;
                    writeln!(out, "Config file: {}", path.display())?;
                }
            }
        }
        ConfigAction::Clear => {
            if Config::remove(path)? {
                writeln!(out, "Removed config file: {}", path.display())?;
            } else {
                writeln!(out, "No config file at: {}", path.display())?;
            }
            if env_api_key().is_some() {
                tracing::warn!("{} is still set in the environment", config::API_KEY_ENV);
                writeln!(out, "Note: {} is still set and will be used.", config::API_KEY_ENV)?;
            }
        }
    }
    Ok(())
}

pub fn cmd_list_models(cfg: Option<&Config>, out: &mut dyn Write) -> anyhow::Result<()> {
    let aliases = ModelAliases::with_overrides(cfg.map(|c| &c.models));
    models::write_table(out, &aliases).context("failed to print model table")?;
    Ok(())
}

/// The provider plus the concrete model it should be asked for.
pub struct Session {
    pub provider: Box<dyn Provider + Send + Sync>,
    pub model: String,
    pub system_prompt: String,
}

pub fn build_session(
    http: &reqwest::Client,
    cfg: Option<&Config>,
    provider_name: &str,
    requested_model: Option<&str>,
    config_path: &Path,
) -> anyhow::Result<Session> {
    match provider_name {
        "dashscope" | "openai" => {
            let settings = Settings::resolve(cfg, env_api_key(), config_path)?;
            tracing::debug!(?settings, "resolved settings");
            let model = settings.model(requested_model);
            let p = provider::openai::OpenAiProvider::new(
                http.clone(),
                settings.api_key.clone(),
                &settings.base_url,
            )?;
            Ok(Session {
                provider: Box::new(p),
                model,
                system_prompt: settings.system_prompt,
            })
        }
        "stub" => {
            let aliases = ModelAliases::with_overrides(cfg.map(|c| &c.models));
            let model = requested_model
                .map(|m| aliases.resolve(m).to_string())
                .unwrap_or_else(|| config::DEFAULT_MODEL.to_string());
            Ok(Session {
                provider: Box::new(provider::stub::StubProvider::new()),
                model,
                system_prompt: config::system_prompt(cfg),
            })
        }
        other => anyhow::bail!("unknown provider: {other}"),
    }
}
