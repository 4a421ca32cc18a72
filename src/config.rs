//! Layered configuration: defaults → `forgequeue.toml` / `.forgequeue-rc` →
//! `FORGEQUEUE_`-prefixed environment variables (spec.md §6).

use anyhow::Result;
use config::{Config as ConfigSource, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    pub max_concurrent: usize,
    pub handler_timeout_ms: u64,
    /// Write every job-scoped lifecycle event to the `activity_log` table.
    /// Off by default; the table exists regardless so enabling it later
    /// needs no migration.
    #[serde(default)]
    pub activity_log_enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            handler_timeout_ms: 600_000,
            activity_log_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_absolute_attempts: u32,
    pub default_max_retries: u32,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_absolute_attempts: 5,
            default_max_retries: 3,
            max_delay_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitConfig {
    pub base_branch: String,
    pub branch_prefix: String,
    pub dry_run: bool,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub github_token: Option<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            branch_prefix: "forgequeue".to_string(),
            dry_run: false,
            owner: None,
            repo: None,
            github_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    pub port: u16,
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CronConfig {
    pub timezone: String,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub save_interval_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://forgequeue.db".to_string(),
            save_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            otlp_endpoint: None,
        }
    }
}

/// Top-level configuration object assembled once at startup
/// (spec.md §6 "A single configuration object assembled at startup").
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ForgequeueConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl ForgequeueConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (`forgequeue.toml`, `.forgequeue-rc`)
    /// 3. Environment variables (prefixed with `FORGEQUEUE_`)
    pub fn load() -> Result<Self> {
        let mut builder = ConfigSource::builder();

        if Path::new("forgequeue.toml").exists() {
            builder = builder.add_source(File::with_name("forgequeue"));
        }
        if Path::new(".forgequeue-rc").exists() {
            builder = builder.add_source(File::with_name(".forgequeue-rc"));
        }

        builder = builder.add_source(
            Environment::with_prefix("FORGEQUEUE")
                .separator("_")
                .try_parsing(true),
        );

        let source = builder.build()?;
        let mut cfg: ForgequeueConfig = source.try_deserialize().unwrap_or_default();

        if cfg.api.api_key.is_none() {
            if let Ok(key) = std::env::var("FORGEQUEUE_API_KEY") {
                cfg.api.api_key = Some(key);
            }
        }
        if cfg.git.github_token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                cfg.git.github_token = Some(token);
            }
        }

        Ok(cfg)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance, loaded once. Executors and other
/// components are constructed with an owned `ForgequeueConfig` passed at
/// call sites rather than re-reading this global everywhere (spec.md §9
/// REDESIGN FLAG "heavy use of in-handler env reads").
static CONFIG: std::sync::LazyLock<Result<ForgequeueConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = ForgequeueConfig::load_env_file();
        ForgequeueConfig::load()
    });

pub fn config() -> Result<&'static ForgequeueConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {}", e))
}

pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("configuration loaded successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = ForgequeueConfig::default();
        assert_eq!(cfg.executor.max_concurrent, 5);
        assert_eq!(cfg.retry.max_absolute_attempts, 5);
        assert_eq!(cfg.retry.default_max_retries, 3);
        assert_eq!(cfg.git.base_branch, "main");
        assert_eq!(cfg.api.port, 8080);
    }
}
