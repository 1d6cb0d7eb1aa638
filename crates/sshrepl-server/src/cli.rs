//! Server CLI implementation.
//!
//! Provides command-line argument parsing for the sshrepl server and folds
//! the flags into the startup configuration.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, ValueEnum};
use serde_json::{Value, json};

use sshrepl_core::config::{RawConfig, ServerConfig, Users};
use sshrepl_core::constants::DEFAULT_PORT;
use sshrepl_core::error::{Error, Result};

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for sshrepl_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => sshrepl_core::LogFormat::Text,
            CliLogFormat::Json => sshrepl_core::LogFormat::Json,
        }
    }
}

/// sshrepl server - interactive REPL sessions over SSH.
#[derive(Debug, Parser)]
#[command(
    name = "sshrepl-server",
    version,
    about = "sshrepl server - interactive REPL sessions over SSH"
)]
pub struct Cli {
    /// Address to listen on (overrides the config file)
    #[arg(short = 'b', long = "bind", value_name = "ADDR")]
    pub bind_addr: Option<IpAddr>,

    /// Port to listen on (overrides the config file)
    #[arg(short = 'p', long = "port", env = "SSHREPL_PORT")]
    pub port: Option<u16>,

    /// JSON configuration file ({ "port", "users", "context", "bind", "host_key" })
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// JSON file mapping user names to credential records
    #[arg(short = 'u', long = "users", value_name = "FILE")]
    pub users: Option<PathBuf>,

    /// JSON file with values bound in every session
    #[arg(long = "context", value_name = "FILE")]
    pub context: Option<PathBuf>,

    /// OpenSSH private host key (default: generate an ephemeral key)
    #[arg(short = 'k', long = "host-key", value_name = "FILE")]
    pub host_key: Option<PathBuf>,

    /// Prompt shown by the built-in REPL unless a user record overrides it
    #[arg(long = "prompt", value_name = "TEXT")]
    pub prompt: Option<String>,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Merge the config file and flags into a raw configuration.
    ///
    /// Flags win over the file. Without either, the port defaults to
    /// [`DEFAULT_PORT`]; users must come from somewhere.
    pub fn raw_config(&self) -> Result<RawConfig> {
        let mut raw = match &self.config {
            Some(path) => RawConfig::load(path)?,
            None => RawConfig::default(),
        };

        if let Some(port) = self.port {
            raw.port = Some(json!(port));
        } else if raw.port.is_none() && self.config.is_none() {
            raw.port = Some(json!(DEFAULT_PORT));
        }
        if let Some(addr) = self.bind_addr {
            raw.bind = Some(addr.to_string());
        }
        if let Some(path) = &self.users {
            raw.users = Some(read_json(path)?);
        }
        if let Some(path) = &self.context {
            raw.context = Some(read_json(path)?);
        }
        if let Some(path) = &self.host_key {
            raw.host_key = Some(path.clone());
        }
        Ok(raw)
    }

    /// Build the validated server configuration.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let mut config = self.raw_config()?.validate()?;
        if let Some(prompt) = &self.prompt {
            apply_default_prompt(&mut config, prompt);
        }
        Ok(config)
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| Error::config(format!("invalid JSON in {}: {}", path.display(), e)))
}

/// Give every static user record a prompt unless it already has one.
fn apply_default_prompt(config: &mut ServerConfig, prompt: &str) {
    if let Users::Static(records) = &mut config.users {
        for record in records.values_mut() {
            record
                .session_options
                .get_or_insert_with(Default::default)
                .entry("prompt")
                .or_insert_with(|| json!(prompt));
        }
    }
}
