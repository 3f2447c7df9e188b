use serde_json::{Map, Value};

use super::{FunctionError, FunctionRegistry};

pub const ARG: &str = "arg";
pub const ENV: &str = "env";
pub const CONFIG: &str = "config";
pub const GET_INPUT: &str = "get_input";

/// Functions available while resolving a command's `parameters`: `arg` and `env`.
#[must_use]
pub fn command_functions(args: &Map<String, Value>) -> FunctionRegistry<'_> {
    FunctionRegistry::new()
        .with(ARG, move |value: &Value| lookup(args, key_argument(value)?))
        .with(ENV, env)
}

/// Functions available while resolving init inputs: `env` and `config`.
#[must_use]
pub fn init_functions(document: &Value) -> FunctionRegistry<'_> {
    FunctionRegistry::new()
        .with(ENV, env)
        .with(CONFIG, move |value: &Value| {
            config_lookup(document, key_argument(value)?)
        })
}

/// Functions available while resolving blueprint outputs: `get_input`.
#[must_use]
pub fn output_functions(inputs: &Map<String, Value>) -> FunctionRegistry<'_> {
    FunctionRegistry::new().with(GET_INPUT, move |value: &Value| {
        lookup(inputs, key_argument(value)?)
    })
}

/// Read an environment variable; unset (or non UTF-8) variables are not found.
///
/// # Errors
///
/// Returns `FunctionError::NotFound` if the variable is unset.
pub fn env(value: &Value) -> Result<Value, FunctionError> {
    let name = key_argument(value)?;
    std::env::var(name)
        .map(Value::String)
        .map_err(|_| FunctionError::NotFound(name.to_string()))
}

fn key_argument(value: &Value) -> Result<&str, FunctionError> {
    value
        .as_str()
        .ok_or_else(|| FunctionError::InvalidArgument(format!("expected a name, got {value}")))
}

fn lookup(values: &Map<String, Value>, key: &str) -> Result<Value, FunctionError> {
    values
        .get(key)
        .cloned()
        .ok_or_else(|| FunctionError::NotFound(key.to_string()))
}

/// Dotted lookup into the configuration document, e.g. `task.retries`.
fn config_lookup(document: &Value, key: &str) -> Result<Value, FunctionError> {
    key.split('.')
        .try_fold(document, |current, segment| current.get(segment))
        .cloned()
        .ok_or_else(|| FunctionError::NotFound(key.to_string()))
}
