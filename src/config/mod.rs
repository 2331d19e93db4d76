//! Environment-backed configuration.
//!
//! Variables are read from the process environment, with an optional `.env`
//! file on top. Directory names are fixed relative to the working directory.

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Fetched source images land here.
pub const INPUT_DIR: &str = "input";
/// Per-job intermediate trees live here, one subdirectory per job.
pub const JOBS_DIR: &str = "jobs";
/// Finished artifacts live here until delivered.
pub const OUTPUT_DIR: &str = "output";

fn default_encoder_threads() -> u32 {
    2
}

fn default_external_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot_api_key: String,
    #[serde(default)]
    pub debug: bool,
    /// Threads handed to each ffmpeg invocation.
    #[serde(default = "default_encoder_threads")]
    pub encoder_threads: u32,
    /// Deadline for every external tool invocation, in seconds.
    #[serde(default = "default_external_timeout_secs")]
    pub external_timeout_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // A missing .env is fine; variables may come from the environment
        // itself.
        let _ = dotenv::dotenv();

        let config: Self =
            envy::from_env().context("failed to read configuration from environment")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bot_api_key.trim().is_empty() {
            bail!("bot_api_key is required");
        }
        if self.encoder_threads == 0 {
            bail!("encoder_threads must be positive");
        }
        if self.external_timeout_secs == 0 {
            bail!("external_timeout_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_vars(vars: Vec<(&str, &str)>) -> Result<AppConfig> {
        let iter = vars
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()));
        let config: AppConfig = envy::from_iter(iter)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn defaults_apply() {
        let config = from_vars(vec![("BOT_API_KEY", "123:abc")]).unwrap();
        assert!(!config.debug);
        assert_eq!(config.encoder_threads, 2);
        assert_eq!(config.external_timeout_secs, 120);
    }

    #[test]
    fn overrides_apply() {
        let config = from_vars(vec![
            ("BOT_API_KEY", "123:abc"),
            ("DEBUG", "true"),
            ("ENCODER_THREADS", "4"),
            ("EXTERNAL_TIMEOUT_SECS", "30"),
        ])
        .unwrap();
        assert!(config.debug);
        assert_eq!(config.encoder_threads, 4);
        assert_eq!(config.external_timeout_secs, 30);
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(from_vars(vec![("BOT_API_KEY", "  ")]).is_err());
    }

    #[test]
    fn zero_threads_are_rejected() {
        let result = from_vars(vec![("BOT_API_KEY", "123:abc"), ("ENCODER_THREADS", "0")]);
        assert!(result.is_err());
    }
}
