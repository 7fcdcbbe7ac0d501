//! Runtime configuration assembled from CLI flags and environment.
//!
//! Identifier validation happens here, before any network connection is
//! attempted, so misconfiguration fails fast with a named field instead
//! of a confusing remote error.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cli::Cli;
use crate::retry::RetryConfig;
use crate::types::LogLevel;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {name}: {detail}")]
    Invalid { name: &'static str, detail: String },
}

#[derive(Clone)]
pub struct Config {
    pub immich_url: String,
    pub immich_api_key: String,
    pub input_album_id: String,
    pub output_album_id: String,
    pub meural_username: String,
    /// Prompted for interactively when absent.
    pub meural_password: Option<String>,
    pub playlist_id: String,
    pub work_dir: PathBuf,
    pub watch_interval: Option<Duration>,
    pub retry: RetryConfig,
    pub concurrency: usize,
    pub log_level: LogLevel,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("immich_url", &self.immich_url)
            .field("immich_api_key", &"<redacted>")
            .field("input_album_id", &self.input_album_id)
            .field("output_album_id", &self.output_album_id)
            .field("meural_username", &self.meural_username)
            .field("meural_password", &self.meural_password.as_ref().map(|_| "<redacted>"))
            .field("playlist_id", &self.playlist_id)
            .field("work_dir", &self.work_dir)
            .field("watch_interval", &self.watch_interval)
            .field("concurrency", &self.concurrency)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let immich_url = required(&cli.immich_url, "immich-url")?;
        let immich_api_key = required(&cli.immich_api_key, "immich-api-key")?;
        let input_album_id = required(&cli.input_album_id, "input-album-id")?;
        let output_album_id = required(&cli.output_album_id, "output-album-id")?;
        let meural_username = required(&cli.meural_username, "meural-username")?;
        let playlist_id = required(&cli.playlist_id, "playlist-id")?;

        if !immich_url.starts_with("http://") && !immich_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                name: "immich-url",
                detail: format!("{immich_url:?} is not an http(s) URL"),
            });
        }
        if cli.concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "concurrency",
                detail: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            immich_url,
            immich_api_key,
            input_album_id,
            output_album_id,
            meural_username,
            meural_password: cli.meural_password.clone().filter(|p| !p.is_empty()),
            playlist_id,
            work_dir: expand_tilde(&cli.work_dir),
            watch_interval: cli.watch_with_interval.map(Duration::from_secs),
            retry: RetryConfig {
                max_attempts: cli.max_attempts.max(1),
                base_delay: Duration::from_secs(cli.retry_delay),
                backoff_factor: 2.0,
            },
            concurrency: cli.concurrency,
            log_level: cli.log_level,
        })
    }
}

fn required(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    fn base_args() -> Vec<&'static str> {
        vec![
            "meural-sync",
            "--immich-url",
            "https://photos.example.com",
            "--immich-api-key",
            "key123",
            "--input-album-id",
            "in-album",
            "--output-album-id",
            "out-album",
            "--meural-username",
            "user@example.com",
            "--playlist-id",
            "gallery-9",
            "sync",
        ]
    }

    #[test]
    fn full_args_parse() {
        let cli = Cli::try_parse_from(base_args()).unwrap();
        let config = Config::from_cli(&cli).unwrap();
        assert_eq!(config.immich_url, "https://photos.example.com");
        assert_eq!(config.playlist_id, "gallery-9");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn missing_identifier_is_reported_by_name() {
        let args: Vec<_> = base_args()
            .into_iter()
            .filter(|a| *a != "--playlist-id" && *a != "gallery-9")
            .collect();
        let cli = Cli::try_parse_from(args).unwrap();
        match Config::from_cli(&cli) {
            Err(ConfigError::Missing(name)) => assert_eq!(name, "playlist-id"),
            other => panic!("expected missing playlist-id, got {other:?}"),
        }
    }

    #[test]
    fn non_http_url_is_rejected() {
        let mut args = base_args();
        args[2] = "photos.example.com";
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            Config::from_cli(&cli),
            Err(ConfigError::Invalid { name: "immich-url", .. })
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut args = base_args();
        args.insert(args.len() - 1, "--meural-password");
        args.insert(args.len() - 1, "hunter2");
        let cli = Cli::try_parse_from(args).unwrap();
        let config = Config::from_cli(&cli).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("key123"));
    }
}
