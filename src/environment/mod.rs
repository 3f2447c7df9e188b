//! Local execution environment
//!
//! An environment is created once by `init` from a blueprint and a set of inputs, persisted
//! below the storage directory, and loaded again by every command invocation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::environment::blueprint::Blueprint;
use crate::functions::{ResolveError, builtin};

pub mod blueprint;
pub mod lifecycle;
pub mod search_path;
pub mod storage;

/// Fixed logical name of the environment managed by the CLI
pub const ENVIRONMENT_NAME: &str = "local";

/// A loaded environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Changes whenever the environment is re-created
    pub id: Uuid,
    pub name: String,
    #[serde(skip)]
    pub dir: PathBuf,
    pub blueprint_path: PathBuf,
    pub blueprint: Blueprint,
    pub inputs: Map<String, Value>,
}

impl Environment {
    /// Directory holding the copied blueprint files; workflows run from here.
    #[must_use]
    pub fn resources_dir(&self) -> PathBuf {
        self.dir.join(storage::RESOURCES_DIR)
    }

    /// Evaluate the blueprint's outputs against the environment inputs.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError` if an output references an input that does not exist.
    pub fn outputs(&self) -> Result<Map<String, Value>, ResolveError> {
        let functions = builtin::output_functions(&self.inputs);
        let mut names: Vec<&String> = self.blueprint.outputs.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| -> Result<(String, Value), ResolveError> {
                let value = functions.resolve(&self.blueprint.outputs[name].value)?;
                Ok((name.clone(), value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::blueprint::OutputSpec;
    use serde_json::json;

    #[test]
    fn test_outputs() {
        let mut blueprint = Blueprint::default();
        blueprint.outputs.insert(
            "output".to_string(),
            OutputSpec {
                value: json!({"get_input": "input"}),
                description: None,
            },
        );
        blueprint.outputs.insert(
            "literal".to_string(),
            OutputSpec {
                value: json!([1, {"get_input": "input"}]),
                description: None,
            },
        );
        let environment = Environment {
            id: Uuid::new_v4(),
            name: ENVIRONMENT_NAME.to_string(),
            dir: PathBuf::new(),
            blueprint_path: PathBuf::from("blueprint.yaml"),
            blueprint,
            inputs: [("input".to_string(), json!("INPUT_VALUE"))]
                .into_iter()
                .collect(),
        };
        assert_eq!(
            Value::Object(environment.outputs().unwrap()),
            json!({"literal": [1, "INPUT_VALUE"], "output": "INPUT_VALUE"})
        );
    }
}
