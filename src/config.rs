use crate::models::ModelAliases;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const API_KEY_ENV: &str = "DASHSCOPE_API_KEY";
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_MODEL: &str = "deepseek-v3.1";
pub const DEFAULT_PROVIDER: &str = "dashscope";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "Reply in Chinese unless the question asks for a different language.";

/// Contents of `config.toml`. Every field is optional.
#[derive(Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible endpoint root, e.g. ".../compatible-mode/v1".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Extra aliases; these win over the built-in table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub models: BTreeMap<String, String>,
}

// Hand-written so the key never lands in a log line.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_deref().map(mask_key))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("provider", &self.provider)
            .field("system_prompt", &self.system_prompt)
            .field("models", &self.models)
            .finish()
    }
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }

    /// Write via a temp file and rename so a crash never leaves half a file.
    pub fn save_atomic(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        crate::paths::ensure_parent(path)?;

        let tmp = tmp_path(path);
        let text = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(&tmp, text)
            .with_context(|| format!("failed to write temp config: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move config into place: {}", path.display()))?;
        Ok(())
    }

    /// Delete the config file. Returns false if there was nothing to delete.
    pub fn remove(path: impl AsRef<Path>) -> anyhow::Result<bool> {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(anyhow::Error::new(e))
                .with_context(|| format!("failed to remove config: {}", path.display())),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "config.toml".to_string());
    p.set_file_name(format!("{file}.tmp"));
    p
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Env,
    File,
}

/// Find the API key, preferring the environment over the config file.
/// Empty values count as unset.
pub fn lookup_api_key(env_key: Option<String>, cfg: Option<&Config>) -> Option<(String, KeySource)> {
    let non_empty = |k: &String| !k.trim().is_empty();
    env_key
        .filter(non_empty)
        .map(|k| (k, KeySource::Env))
        .or_else(|| {
            cfg.and_then(|c| c.api_key.clone())
                .filter(non_empty)
                .map(|k| (k, KeySource::File))
        })
}

/// Show the first 8 and last 4 characters of a key.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 12))
}

/// Everything a chat session needs, resolved from environment, file, and defaults.
#[derive(Clone)]
pub struct Settings {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub system_prompt: String,
    pub aliases: ModelAliases,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &mask_key(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

impl Settings {
    pub fn resolve(
        cfg: Option<&Config>,
        env_key: Option<String>,
        config_path: &Path,
    ) -> anyhow::Result<Self> {
        let Some((api_key, source)) = lookup_api_key(env_key, cfg) else {
            anyhow::bail!(
                "No API key found. Set {API_KEY_ENV} or run `ag config set --api-key <KEY>`. (config path: {})",
                config_path.display()
            );
        };
        tracing::debug!(?source, "resolved API key");

        Ok(Self {
            api_key,
            base_url: cfg
                .and_then(|c| c.base_url.clone())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            default_model: cfg
                .and_then(|c| c.default_model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: system_prompt(cfg),
            aliases: ModelAliases::with_overrides(cfg.map(|c| &c.models)),
        })
    }

    /// Resolve an alias or pass the name through; `None` means the default model.
    pub fn model(&self, requested: Option<&str>) -> String {
        match requested {
            Some(name) => self.aliases.resolve(name).to_string(),
            None => self.default_model.clone(),
        }
    }
}

pub fn system_prompt(cfg: Option<&Config>) -> String {
    cfg.and_then(|c| c.system_prompt.clone())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}
