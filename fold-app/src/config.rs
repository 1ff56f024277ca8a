//! promptfold configuration loader.
//!
//! Optional TOML file, then environment overrides, then validation. The
//! process can run with no config file at all when the required values
//! arrive via the environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptfoldConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationConfig {
    /// Ordered pool of upstream API keys, rotated round-robin.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Seconds to wait after the last message before dispatching.
    #[serde(default = "default_quiet_period_secs")]
    pub quiet_period_secs: u64,
    /// Hard bound on a single generation call.
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
    /// Instruction text prepended to every aggregated request.
    #[serde(default)]
    pub prompt_prefix: Option<String>,
}

fn default_quiet_period_secs() -> u64 {
    60
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quiet_period_secs: default_quiet_period_secs(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            prompt_prefix: None,
        }
    }
}

impl PromptfoldConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                PromptfoldConfig::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!("read config {}: {e}", path.display()));
            }
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !v.trim().is_empty() {
                self.telegram.bot_token = v;
            }
        }
        if let Ok(v) = std::env::var("GEMINI_API_KEYS") {
            let keys = parse_key_list(&v);
            if !keys.is_empty() {
                self.generation.api_keys = keys;
            }
        }
        if let Ok(v) = std::env::var("PROMPTFOLD_GENERATION_ENDPOINT") {
            if !v.trim().is_empty() {
                self.generation.endpoint = Some(v);
            }
        }
        if let Ok(v) = std::env::var("PROMPTFOLD_QUIET_PERIOD_SECS") {
            match v.parse::<u64>() {
                Ok(secs) => self.engine.quiet_period_secs = secs,
                Err(e) => {
                    tracing::warn!(%e, value = %v, "ignoring bad PROMPTFOLD_QUIET_PERIOD_SECS")
                }
            }
        }
        if let Ok(v) = std::env::var("PROMPTFOLD_UPSTREAM_TIMEOUT_SECS") {
            match v.parse::<u64>() {
                Ok(secs) => self.engine.upstream_timeout_secs = secs,
                Err(e) => {
                    tracing::warn!(%e, value = %v, "ignoring bad PROMPTFOLD_UPSTREAM_TIMEOUT_SECS")
                }
            }
        }
        if let Ok(v) = std::env::var("PROMPTFOLD_PROMPT_PREFIX") {
            if !v.trim().is_empty() {
                self.engine.prompt_prefix = Some(v);
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "telegram.bot_token is required (set TELEGRAM_BOT_TOKEN)"
            ));
        }
        if self.generation.api_keys.is_empty() {
            return Err(anyhow::anyhow!(
                "generation.api_keys must not be empty (set GEMINI_API_KEYS)"
            ));
        }
        if self.engine.quiet_period_secs == 0 {
            return Err(anyhow::anyhow!("engine.quiet_period_secs must be > 0"));
        }
        if self.engine.upstream_timeout_secs == 0 {
            return Err(anyhow::anyhow!("engine.upstream_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.engine.quiet_period_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.upstream_timeout_secs)
    }
}

fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".promptfold").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::{PromptfoldConfig, parse_key_list};

    #[test]
    fn key_list_parsing_trims_and_drops_empties() {
        assert_eq!(parse_key_list("a, b ,,c,"), ["a", "b", "c"]);
        assert!(parse_key_list("  ,  ").is_empty());
    }

    #[test]
    fn validation_requires_token_and_keys() {
        let mut cfg = PromptfoldConfig::default();
        assert!(cfg.validate().is_err(), "missing token rejected");

        cfg.telegram.bot_token = "123:abc".to_string();
        assert!(cfg.validate().is_err(), "empty key pool rejected");

        cfg.generation.api_keys = vec!["k1".to_string()];
        assert!(cfg.validate().is_ok());

        cfg.engine.quiet_period_secs = 0;
        assert!(cfg.validate().is_err(), "zero quiet period rejected");
    }

    #[test]
    fn toml_sections_deserialize_with_defaults() {
        let cfg: PromptfoldConfig = toml::from_str(
            r#"
[telegram]
bot_token = "123:abc"

[generation]
api_keys = ["k1", "k2"]

[engine]
quiet_period_secs = 5
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.generation.api_keys.len(), 2);
        assert_eq!(cfg.engine.quiet_period_secs, 5);
        assert_eq!(cfg.engine.upstream_timeout_secs, 30, "default applies");
        assert!(cfg.engine.prompt_prefix.is_none());
    }
}
