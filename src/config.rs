// ABOUTME: Server configuration resolved from CLI flags, environment and a TOML file
// ABOUTME: Precedence is flag or env var, then file, then built-in default

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use sync_engine::publisher::DEFAULT_PUBLISHER_CAPACITY;
use sync_engine::session::DEFAULT_SESSION_BUFFER;

use crate::utils::{default_token_path, validate_connection_string};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:50061";
pub const DEFAULT_CONNECT_RETRIES: u32 = 5;

/// Contents of `metadata-sync.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub listen: Option<String>,
    pub database_url: Option<String>,
    pub token_file: Option<PathBuf>,
    pub publisher_capacity: Option<usize>,
    pub session_buffer: Option<usize>,
    pub allow_self_signed_certs: Option<bool>,
    pub connect_retries: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// Values given on the command line or through environment variables.
#[derive(Debug, Clone, Default)]
pub struct ServeOverrides {
    pub listen: Option<String>,
    pub database_url: Option<String>,
    pub token_file: Option<PathBuf>,
    pub publisher_capacity: Option<usize>,
    pub session_buffer: Option<usize>,
    pub allow_self_signed_certs: bool,
    pub connect_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServeConfig {
    pub listen: SocketAddr,
    pub database_url: String,
    pub token_file: PathBuf,
    pub publisher_capacity: usize,
    pub session_buffer: usize,
    pub allow_self_signed_certs: bool,
    pub connect_retries: u32,
}

impl ServeConfig {
    pub fn resolve(overrides: ServeOverrides, file: FileConfig) -> Result<Self> {
        let listen = overrides
            .listen
            .or(file.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen = parse_listen(&listen)?;

        let database_url = overrides
            .database_url
            .or(file.database_url)
            .ok_or_else(|| {
                anyhow!("database URL not provided. Use --database-url, METADATA_SYNC_DATABASE_URL or database_url in the config file")
            })?;
        validate_connection_string(&database_url)?;

        let token_file = match overrides.token_file.or(file.token_file) {
            Some(path) => expand_home(path)?,
            None => default_token_path()?,
        };

        let publisher_capacity = overrides
            .publisher_capacity
            .or(file.publisher_capacity)
            .unwrap_or(DEFAULT_PUBLISHER_CAPACITY);
        if publisher_capacity == 0 {
            bail!("publisher_capacity must be at least 1");
        }
        let session_buffer = overrides
            .session_buffer
            .or(file.session_buffer)
            .unwrap_or(DEFAULT_SESSION_BUFFER);
        if session_buffer == 0 {
            bail!("session_buffer must be at least 1");
        }

        Ok(Self {
            listen,
            database_url,
            token_file,
            publisher_capacity,
            session_buffer,
            allow_self_signed_certs: overrides.allow_self_signed_certs
                || file.allow_self_signed_certs.unwrap_or(false),
            connect_retries: overrides
                .connect_retries
                .or(file.connect_retries)
                .unwrap_or(DEFAULT_CONNECT_RETRIES),
        })
    }
}

/// Accepts `host:port` or `tcp:<port>` (loopback).
pub fn parse_listen(value: &str) -> Result<SocketAddr> {
    let value = value.trim();
    if let Some(port) = value.strip_prefix("tcp:") {
        let port: u16 = port
            .parse()
            .map_err(|_| anyhow!("tcp listener must specify a numeric port"))?;
        return Ok(SocketAddr::from(([127, 0, 0, 1], port)));
    }
    value
        .parse()
        .with_context(|| format!("invalid listen address '{value}', expected host:port or tcp:<port>"))
}

pub fn expand_home(path: PathBuf) -> Result<PathBuf> {
    let as_str = path.to_string_lossy();
    if let Some(stripped) = as_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
        return Ok(home.join(stripped));
    }
    if as_str == "~" {
        return dirs::home_dir().ok_or_else(|| anyhow!("unable to determine home directory"));
    }
    Ok(path)
}
