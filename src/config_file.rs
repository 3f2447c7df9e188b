//! Configuration file handling for clash

use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::commands::arg::{ArgSpec, ArgSpecError};
use crate::commands::command::CommandSpec;
use crate::commands::namespace::{NamespaceSpec, Node};
use crate::commands::task::TaskOverride;

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No config file found in current directory or its parents: {0}")]
    ConfigNotFound(PathBuf),
    #[error("Unknown working directory: {0}")]
    UnknownWorkingDirectory(String),
    #[error("Unable to parse YAML config file {path}: {source}")]
    Yaml {
        source: serde_yaml::Error,
        path: PathBuf,
    },
    #[error("Unable to parse JSON config file {path}: {source}")]
    Json {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("Invalid config: {0}")]
    Document(#[source] serde_json::Error),
    #[error("Invalid entry `{entry}`: {message}")]
    InvalidEntry { entry: String, message: String },
    #[error("Invalid command `{entry}`: {source}")]
    InvalidCommand {
        entry: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid argument in command `{command}`: {source}")]
    InvalidArg {
        command: String,
        #[source]
        source: ArgSpecError,
    },
    #[error("Invalid config: {0}")]
    Validation(String),
}

/// Configuration for a single command, as written in the document
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigCommand {
    pub workflow: String,
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
    #[serde(default)]
    pub args: Vec<Map<String, Value>>,
    #[serde(default)]
    pub task: TaskOverride,
    pub help: Option<String>,
}

fn empty_parameters() -> Value {
    Value::Object(Map::new())
}

/// Root configuration structure for clash
///
/// Unrecognized top-level keys are kept in the raw document and can be read with the
/// `config` function while resolving init inputs.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub name: Option<String>,
    pub description: Option<String>,
    pub blueprint: Option<PathBuf>,
    pub storage_dir: Option<PathBuf>,
    #[serde(default)]
    pub commands: Map<String, Value>,
    #[serde(default)]
    pub task: TaskOverride,
    #[serde(default)]
    pub inputs: Value,
}

/// List of supported configuration file names
const FILENAMES: [&str; 6] = [
    "clash.yaml",
    "clash.yml",
    "clash.json",
    ".clash.yaml",
    ".clash.yml",
    ".clash.json",
];

impl Config {
    /// Reads a configuration file into a raw document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if the file cannot be read, or
    /// `ConfigError::Yaml`/`ConfigError::Json` if parsing fails.
    pub fn read_document(file: &Path) -> Result<Value, ConfigError> {
        let contents = std::fs::read_to_string(file)
            .map_err(|_| ConfigError::ConfigNotFound(file.to_path_buf()))?;
        if file.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&contents).map_err(|e| ConfigError::Json {
                source: e,
                path: file.to_path_buf(),
            })
        } else {
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Yaml {
                source: e,
                path: file.to_path_buf(),
            })
        }
    }

    /// Interprets a raw document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Document` if the document does not have the expected shape.
    pub fn from_document(document: &Value) -> Result<Config, ConfigError> {
        let document = match document {
            // An empty YAML file parses as null
            Value::Null => empty_parameters(),
            other => other.clone(),
        };
        serde_json::from_value(document).map_err(ConfigError::Document)
    }

    /// Searches for a configuration file in the current directory and its parents.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownWorkingDirectory` if the cwd cannot be determined,
    /// or `ConfigError::ConfigNotFound` if no config file is found.
    pub fn find_config() -> Result<PathBuf, ConfigError> {
        let config_path = std::env::current_dir()
            .map_err(|e| ConfigError::UnknownWorkingDirectory(e.to_string()))?;
        let mut path = config_path.clone();
        debug!("Searching for config file in {}", config_path.display());
        loop {
            for file in &FILENAMES {
                let config_path = path.join(file);
                if config_path.exists() {
                    debug!("Found config file: {}", config_path.display());
                    return Ok(config_path);
                }
            }
            if !path.pop() {
                return Err(ConfigError::ConfigNotFound(config_path));
            }
        }
    }
}

/// Build the command tree from the `commands` section.
///
/// # Errors
///
/// Returns `ConfigError` for entries that are not mappings, commands with unknown keys,
/// and malformed argument declarations.
pub fn parse_commands(commands: &Map<String, Value>) -> Result<NamespaceSpec, ConfigError> {
    parse_namespace(String::new(), Vec::new(), commands)
}

fn parse_namespace(
    name: String,
    namespace: Vec<String>,
    entries: &Map<String, Value>,
) -> Result<NamespaceSpec, ConfigError> {
    let mut child_namespace = namespace.clone();
    if !name.is_empty() {
        child_namespace.push(name.clone());
    }

    let children = entries
        .iter()
        .map(|(child_name, value)| parse_node(child_name, &child_namespace, value))
        .collect::<Result<Vec<Node>, ConfigError>>()?;

    Ok(NamespaceSpec {
        name,
        namespace,
        children,
    })
}

fn parse_node(name: &str, namespace: &[String], value: &Value) -> Result<Node, ConfigError> {
    let entry = entry_name(namespace, name);
    if !is_valid_command_name(name) {
        return Err(ConfigError::InvalidEntry {
            entry,
            message: "names must be non-empty and must not contain whitespace".to_string(),
        });
    }
    let Value::Object(mapping) = value else {
        return Err(ConfigError::InvalidEntry {
            entry,
            message: "expected a mapping".to_string(),
        });
    };

    if !mapping.contains_key("workflow") {
        return parse_namespace(name.to_string(), namespace.to_vec(), mapping).map(Node::Namespace);
    }

    let command: ConfigCommand =
        serde_json::from_value(value.clone()).map_err(|source| ConfigError::InvalidCommand {
            entry: entry.clone(),
            source,
        })?;
    let args = command
        .args
        .iter()
        .map(ArgSpec::try_from)
        .collect::<Result<Vec<ArgSpec>, ArgSpecError>>()
        .map_err(|source| ConfigError::InvalidArg {
            command: entry,
            source,
        })?;

    Ok(Node::Command(CommandSpec {
        name: name.to_string(),
        namespace: namespace.to_vec(),
        workflow: command.workflow,
        parameters: command.parameters,
        args,
        task: command.task,
        help: command.help,
    }))
}

fn entry_name(namespace: &[String], name: &str) -> String {
    let mut entry = namespace.join(".");
    if !entry.is_empty() {
        entry.push('.');
    }
    entry.push_str(name);
    entry
}

fn is_valid_command_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('-') && !name.chars().any(char::is_whitespace)
}
