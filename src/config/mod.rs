//! Typed configuration from an optional TOML file and environment variables.
//!
//! Loads once at startup, fails fast if required values are missing.
//! Environment variables override file values. The database URL is wrapped
//! in secrecy::SecretString to keep credentials out of logs.

use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_NOTICE_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub max_connections: u32,
    /// Buffered notices per subscriber before the slowest one starts lagging.
    pub notice_capacity: usize,
}

/// On-disk shape. Every field is optional so the environment can fill gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database_url: Option<String>,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
    max_connections: Option<u32>,
    notice_capacity: Option<usize>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Self::merge(FileConfig::default())
    }

    /// Load `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::parse_file(&text)?
            }
            None => FileConfig::default(),
        };
        Self::merge(file)
    }

    fn parse_file(text: &str) -> Result<FileConfig> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid config file: {e}")))
    }

    fn merge(file: FileConfig) -> Result<Self> {
        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) => SecretString::from(url),
            Err(_) => file.database_url.map(SecretString::from).ok_or_else(|| {
                Error::Config("required environment variable DATABASE_URL is not set".to_string())
            })?,
        };

        Ok(Self {
            database_url,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok().or(file.otel_endpoint),
            log_level: std::env::var("LOG_LEVEL")
                .ok()
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            max_connections: parsed_var("HERMES_MAX_CONNECTIONS")?
                .or(file.max_connections)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            notice_capacity: parsed_var("HERMES_NOTICE_CAPACITY")?
                .or(file.notice_capacity)
                .unwrap_or(DEFAULT_NOTICE_CAPACITY),
        })
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} is not a valid number: {raw}"))),
        Err(_) => Ok(None),
    }
}
