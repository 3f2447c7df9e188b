use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlueprintError {
    #[error("Unable to read blueprint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to parse blueprint {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Unknown inputs: {}", .0.join(", "))]
    UnknownInputs(Vec<String>),
    #[error("Missing values for required inputs: {}", .0.join(", "))]
    MissingInputs(Vec<String>),
}

/// Declared input of a blueprint; inputs without a default are required
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InputSpec {
    pub default: Option<Value>,
    pub description: Option<String>,
}

/// Declared output of a blueprint, computed from the inputs with `get_input`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    pub value: Value,
    pub description: Option<String>,
}

/// A workflow is a shell script, optionally with extra environment variables
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum WorkflowSpec {
    Script(String),
    Detailed {
        script: String,
        #[serde(default)]
        env: HashMap<String, String>,
    },
}

impl WorkflowSpec {
    #[must_use]
    pub fn script(&self) -> &str {
        match self {
            WorkflowSpec::Script(script) | WorkflowSpec::Detailed { script, .. } => script,
        }
    }

    #[must_use]
    pub fn env(&self) -> Option<&HashMap<String, String>> {
        match self {
            WorkflowSpec::Script(_) => None,
            WorkflowSpec::Detailed { env, .. } => Some(env),
        }
    }
}

/// Definition an environment is created from
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Blueprint {
    #[serde(default)]
    pub inputs: HashMap<String, InputSpec>,
    #[serde(default)]
    pub outputs: HashMap<String, OutputSpec>,
    #[serde(default)]
    pub workflows: HashMap<String, WorkflowSpec>,
}

impl Blueprint {
    /// Loads a blueprint from a YAML (or JSON) file.
    ///
    /// # Errors
    ///
    /// Returns `BlueprintError::Read` or `BlueprintError::Parse`.
    pub fn from_file(path: &Path) -> Result<Blueprint, BlueprintError> {
        let contents = std::fs::read_to_string(path).map_err(|source| BlueprintError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| BlueprintError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Combine `provided` inputs with declared defaults.
    ///
    /// # Errors
    ///
    /// Returns `BlueprintError::UnknownInputs` for undeclared names and
    /// `BlueprintError::MissingInputs` for required inputs without a value.
    pub fn effective_inputs(
        &self,
        provided: &Map<String, Value>,
    ) -> Result<Map<String, Value>, BlueprintError> {
        let mut unknown: Vec<String> = provided
            .keys()
            .filter(|name| !self.inputs.contains_key(*name))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            unknown.sort();
            return Err(BlueprintError::UnknownInputs(unknown));
        }

        let mut names: Vec<&String> = self.inputs.keys().collect();
        names.sort();

        let mut inputs = Map::new();
        let mut missing = Vec::new();
        for name in names {
            match provided.get(name).or(self.inputs[name].default.as_ref()) {
                Some(value) => {
                    inputs.insert(name.clone(), value.clone());
                }
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(BlueprintError::MissingInputs(missing));
        }
        Ok(inputs)
    }
}
