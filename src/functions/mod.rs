//! Function evaluation over declarative parameter trees
//!
//! Parameter trees are plain JSON values. A single-key mapping whose key names a function,
//! such as `{arg: "name"}` or `{env: "HOME"}`, is an invocation node: resolving the tree
//! replaces it with whatever the function evaluates to. Everything else passes through
//! untouched.
//!
//! A [`FunctionRegistry`] is an ordinary value built for one resolution pass. The helpers in
//! this module construct one, resolve, and drop it on every exit path, so functions registered
//! for resolving command parameters are never visible while resolving init inputs and vice
//! versa.

use std::collections::BTreeMap;
use std::fmt;

use log::trace;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod builtin;

/// Names that are always treated as invocations, registered or not.
///
/// Using one of these in a context that does not provide it (e.g. `arg` inside init inputs)
/// is reported as an unknown function rather than silently kept as data.
pub const KNOWN_FUNCTIONS: [&str; 4] = [
    builtin::ARG,
    builtin::ENV,
    builtin::CONFIG,
    builtin::GET_INPUT,
];

/// Failure reported by a single evaluator, before it is tied to a tree position
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FunctionError {
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidArgument(String),
}

/// Errors that can occur while resolving a parameter tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown function `{function}` at {path}")]
    UnknownFunction { function: String, path: String },
    #[error("function `{function}` at {path}: `{key}` not found")]
    NotFound {
        function: String,
        key: String,
        path: String,
    },
    #[error("function `{function}` at {path}: {message}")]
    InvalidArgument {
        function: String,
        message: String,
        path: String,
    },
}

impl ResolveError {
    /// Name of the function that failed.
    #[must_use]
    pub fn function(&self) -> &str {
        match self {
            ResolveError::UnknownFunction { function, .. }
            | ResolveError::NotFound { function, .. }
            | ResolveError::InvalidArgument { function, .. } => function,
        }
    }

    /// Position of the failing invocation node, e.g. `$.items[1].name`.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            ResolveError::UnknownFunction { path, .. }
            | ResolveError::NotFound { path, .. }
            | ResolveError::InvalidArgument { path, .. } => path,
        }
    }
}

/// An evaluator receives the (already resolved) function arguments.
pub type Evaluator<'a> = Box<dyn Fn(&Value) -> Result<Value, FunctionError> + 'a>;

/// Named evaluators available to one resolution pass
#[derive(Default)]
pub struct FunctionRegistry<'a> {
    functions: BTreeMap<String, Evaluator<'a>>,
}

impl fmt::Debug for FunctionRegistry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}

impl<'a> FunctionRegistry<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `evaluator` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, evaluator: F)
    where
        F: Fn(&Value) -> Result<Value, FunctionError> + 'a,
    {
        self.functions.insert(name.into(), Box::new(evaluator));
    }

    /// Builder-style [`FunctionRegistry::register`].
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, evaluator: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, FunctionError> + 'a,
    {
        self.register(name, evaluator);
        self
    }

    /// Remove `name`, returning whether it was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    /// Move every entry of `other` into this registry; entries in `other` win.
    pub fn extend(&mut self, other: FunctionRegistry<'a>) {
        self.functions.extend(other.functions);
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Resolve every invocation node in `tree`.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError` for the first invocation that cannot be evaluated. No partially
    /// resolved tree is returned.
    pub fn resolve(&self, tree: &Value) -> Result<Value, ResolveError> {
        self.resolve_at(tree, &mut TreePath::default())
    }

    fn resolve_at(&self, value: &Value, path: &mut TreePath) -> Result<Value, ResolveError> {
        match value {
            Value::Object(map) => {
                if let Some((name, args)) = self.invocation(map) {
                    return self.evaluate(name, args, path);
                }
                let mut resolved = Map::with_capacity(map.len());
                for (key, child) in map {
                    path.push(Segment::Key(key.clone()));
                    let child = self.resolve_at(child, path);
                    path.pop();
                    resolved.insert(key.clone(), child?);
                }
                Ok(Value::Object(resolved))
            }
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    path.push(Segment::Index(index));
                    let item = self.resolve_at(item, path);
                    path.pop();
                    resolved.push(item?);
                }
                Ok(Value::Array(resolved))
            }
            _ => Ok(value.clone()),
        }
    }

    fn invocation<'v>(&self, map: &'v Map<String, Value>) -> Option<(&'v str, &'v Value)> {
        if map.len() != 1 {
            return None;
        }
        let (name, args) = map.iter().next()?;
        let is_function = self.contains(name) || KNOWN_FUNCTIONS.contains(&name.as_str());
        is_function.then_some((name.as_str(), args))
    }

    fn evaluate(&self, name: &str, args: &Value, path: &mut TreePath) -> Result<Value, ResolveError> {
        let Some(evaluator) = self.functions.get(name) else {
            return Err(ResolveError::UnknownFunction {
                function: name.to_string(),
                path: path.to_string(),
            });
        };

        // Arguments may themselves be computed, e.g. `{env: {arg: variable}}`
        path.push(Segment::Key(name.to_string()));
        let args = self.resolve_at(args, path);
        path.pop();
        let args = args?;

        trace!("Evaluating `{name}` at {path}");
        evaluator(&args).map_err(|e| match e {
            FunctionError::NotFound(key) => ResolveError::NotFound {
                function: name.to_string(),
                key,
                path: path.to_string(),
            },
            FunctionError::InvalidArgument(message) => ResolveError::InvalidArgument {
                function: name.to_string(),
                message,
                path: path.to_string(),
            },
        })
    }
}

enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Default)]
struct TreePath(Vec<Segment>);

impl TreePath {
    fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    fn pop(&mut self) {
        self.0.pop();
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.0 {
            match segment {
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Resolve a command's parameter tree with `arg` and `env` available.
///
/// # Errors
///
/// Returns `ResolveError` if an argument or environment variable is missing, or the tree
/// uses a function that is not available to commands.
pub fn resolve_parameters(
    parameters: &Value,
    args: &Map<String, Value>,
) -> Result<Value, ResolveError> {
    builtin::command_functions(args).resolve(parameters)
}

/// Resolve init-time inputs with `env` and `config` available; there are no CLI arguments yet.
///
/// # Errors
///
/// Returns `ResolveError` if an environment variable or config key is missing, or the tree
/// uses `arg`.
pub fn resolve_init_inputs(inputs: &Value, document: &Value) -> Result<Value, ResolveError> {
    builtin::init_functions(document).resolve(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_plain_tree_is_unchanged() {
        let tree = json!({
            "a": 1,
            "b": [true, null, "x", {"c": 2.5}],
            "d": {"e": {"f": "g"}},
            "two": {"keys": 1, "here": 2},
            "single": {"not_a_function": 3}
        });
        let resolved = resolve_parameters(&tree, &Map::new()).unwrap();
        assert_eq!(resolved, tree);
    }

    #[test]
    fn test_arg_lookup() {
        let tree = json!({"p": {"arg": "a1"}});
        let resolved = resolve_parameters(&tree, &args(&[("a1", json!("x"))])).unwrap();
        assert_eq!(resolved, json!({"p": "x"}));
    }

    #[test]
    fn test_arg_missing_fails_without_partial_result() {
        let tree = json!({"ok": {"arg": "a1"}, "p": {"arg": "missing"}});
        let err = resolve_parameters(&tree, &args(&[("a1", json!("x"))])).unwrap_err();
        assert_eq!(
            err,
            ResolveError::NotFound {
                function: "arg".to_string(),
                key: "missing".to_string(),
                path: "$.p".to_string(),
            }
        );
    }

    #[test]
    fn test_invocations_inside_sequences_and_nested_maps() {
        let tree = json!({
            "items": [{"arg": "first"}, {"nested": {"value": {"arg": "second"}}}, 3]
        });
        let parsed = args(&[("first", json!(1)), ("second", json!(["a", "b"]))]);
        let resolved = resolve_parameters(&tree, &parsed).unwrap();
        assert_eq!(
            resolved,
            json!({"items": [1, {"nested": {"value": ["a", "b"]}}, 3]})
        );
    }

    #[test]
    fn test_error_path_points_into_sequences() {
        let tree = json!({"items": [1, {"deep": {"arg": "nope"}}]});
        let err = resolve_parameters(&tree, &Map::new()).unwrap_err();
        assert_eq!(err.function(), "arg");
        assert_eq!(err.path(), "$.items[1].deep");
        assert!(err.to_string().contains("`nope` not found"));
    }

    #[test]
    fn test_env_lookup() {
        temp_env::with_var("CLASH_TEST_FUNCTIONS_E", Some("7"), || {
            let tree = json!({"p": {"env": "CLASH_TEST_FUNCTIONS_E"}});
            let resolved = resolve_parameters(&tree, &Map::new()).unwrap();
            assert_eq!(resolved, json!({"p": "7"}));
        });
        temp_env::with_var_unset("CLASH_TEST_FUNCTIONS_E", || {
            let tree = json!({"p": {"env": "CLASH_TEST_FUNCTIONS_E"}});
            let err = resolve_parameters(&tree, &Map::new()).unwrap_err();
            assert!(matches!(err, ResolveError::NotFound { ref function, .. } if function == "env"));
        });
    }

    #[test]
    fn test_function_arguments_are_resolved_first() {
        temp_env::with_var("CLASH_TEST_FUNCTIONS_NESTED", Some("inner"), || {
            let tree = json!({"p": {"env": {"arg": "variable"}}});
            let parsed = args(&[("variable", json!("CLASH_TEST_FUNCTIONS_NESTED"))]);
            let resolved = resolve_parameters(&tree, &parsed).unwrap();
            assert_eq!(resolved, json!({"p": "inner"}));
        });
    }

    #[test]
    fn test_arg_is_unknown_in_init_context() {
        let tree = json!({"input": {"arg": "a1"}});
        let err = resolve_init_inputs(&tree, &json!({})).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnknownFunction {
                function: "arg".to_string(),
                path: "$.input".to_string(),
            }
        );
    }

    #[test]
    fn test_non_string_argument_is_rejected() {
        let tree = json!({"p": {"arg": 5}});
        let err = resolve_parameters(&tree, &Map::new()).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidArgument { .. }));
    }

    #[test]
    fn test_custom_functions_are_scoped_to_their_registry() {
        let tree = json!({"p": {"twice": 21}});
        let registry = FunctionRegistry::new().with("twice", |args: &Value| {
            args.as_i64()
                .map(|n| json!(n * 2))
                .ok_or_else(|| FunctionError::InvalidArgument("expected an integer".to_string()))
        });
        assert_eq!(registry.resolve(&tree).unwrap(), json!({"p": 42}));

        // A fresh pass does not see `twice`, so the node is plain data again
        let resolved = resolve_parameters(&tree, &Map::new()).unwrap();
        assert_eq!(resolved, tree);
    }

    #[test]
    fn test_registry_is_clean_after_failure() {
        let failing = json!({"p": {"arg": "missing"}});
        assert!(resolve_parameters(&failing, &Map::new()).is_err());

        let document = Value::Null;
        let registry = builtin::init_functions(&document);
        assert!(!registry.contains("arg"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["config", "env"]);
    }

    #[test]
    fn test_register_and_unregister() {
        let mut registry = FunctionRegistry::new();
        registry.register("one", |_: &Value| Ok(json!(1)));
        assert!(registry.contains("one"));
        assert!(registry.unregister("one"));
        assert!(!registry.unregister("one"));

        let err = registry.resolve(&json!({"env": "X"})).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownFunction { .. }));
    }

    #[test]
    fn test_extend_with_caller_functions() {
        let inputs: Map<String, Value> = [("region".to_string(), json!("eu"))].into_iter().collect();
        let mut registry = builtin::command_functions(&inputs);
        registry.extend(
            FunctionRegistry::new()
                .with("upper", |args: &Value| {
                    args.as_str()
                        .map(|s| json!(s.to_uppercase()))
                        .ok_or_else(|| FunctionError::InvalidArgument("expected a string".to_string()))
                })
                .with(builtin::ARG, |_: &Value| Ok(json!("replaced"))),
        );
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["arg", "env", "upper"]
        );
        assert_eq!(
            registry
                .resolve(&json!({"a": {"upper": "x"}, "b": {"arg": "region"}}))
                .unwrap(),
            json!({"a": "X", "b": "replaced"})
        );
    }
}
