//! Core implementation of clash
//!
//! Clash turns a declarative configuration document into a command-line interface. Every
//! configured command resolves its parameters from CLI arguments and the process environment,
//! then hands a workflow name, the resolved parameters and its task settings to a workflow
//! engine running inside a locally persisted environment.

use std::path::{Path, PathBuf};

use log::debug;
use serde_json::Value;

use crate::commands::namespace::NamespaceSpec;
use crate::commands::task::TaskOverride;
use crate::config_file::{Config, ConfigError, parse_commands};

pub mod cli;
pub mod commands;
pub mod config_file;
pub mod dispatch;
pub mod engine;
pub mod environment;
pub mod functions;
pub mod logger;

/// Blueprint file used when the config does not name one
pub const DEFAULT_BLUEPRINT: &str = "blueprint.yaml";
/// Storage directory used when the config does not name one
pub const DEFAULT_STORAGE_DIR: &str = ".local";

/// A validated configuration with all paths resolved against the config file's directory
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub name: String,
    pub description: Option<String>,
    pub root: NamespaceSpec,
    pub task: TaskOverride,
    /// Init-time parameter tree, resolved when `init` runs
    pub inputs: Value,
    pub blueprint_path: PathBuf,
    pub storage_dir: PathBuf,
    pub config_path: PathBuf,
    /// The raw document, read by the `config` function
    pub document: Value,
}

impl LoadedConfig {
    /// Interpret `document` as if it had been read from `config_path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the document or its command tree is invalid.
    pub fn from_document(document: Value, config_path: &Path) -> Result<Self, ConfigError> {
        let base_dir = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let config = Config::from_document(&document)?;
        let root = parse_commands(&config.commands)?;

        let blueprint = config
            .blueprint
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BLUEPRINT));
        let storage_dir = config
            .storage_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));

        Ok(LoadedConfig {
            name: config
                .name
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            description: config.description,
            root,
            task: config.task,
            inputs: config.inputs,
            blueprint_path: resolve_path(&base_dir, &blueprint),
            storage_dir: resolve_path(&base_dir, &storage_dir),
            config_path: config_path.to_path_buf(),
            document,
        })
    }
}

/// Load configuration from a file (or auto-detect).
///
/// # Errors
///
/// Returns `ConfigError` if the config file is not found, cannot be parsed, or contains
/// invalid commands.
pub fn load_config(config_file: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let config_path = match config_file {
        Some(file) => {
            if !file.is_file() {
                return Err(ConfigError::ConfigNotFound(file.to_path_buf()));
            }
            std::path::absolute(file)
                .map_err(|e| ConfigError::UnknownWorkingDirectory(e.to_string()))?
        }
        None => Config::find_config()?,
    };
    debug!("Loading config file: {}", config_path.display());
    let document = Config::read_document(&config_path)?;
    LoadedConfig::from_document(document, &config_path)
}

/// Expand a leading `~` and make `path` relative to `base`.
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(rest);
    }
    if path.is_relative() {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}
