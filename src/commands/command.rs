use serde_json::Value;

use crate::commands::arg::ArgSpec;
use crate::commands::task::TaskOverride;

/// A leaf of the command tree: one invokable workflow with its arguments
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub name: String,
    /// Namespace names leading to this command, excluding its own name
    pub namespace: Vec<String>,
    pub workflow: String,
    pub parameters: Value,
    pub args: Vec<ArgSpec>,
    pub task: TaskOverride,
    pub help: Option<String>,
}

impl CommandSpec {
    /// Full path of the command, e.g. `["nested", "command2"]`.
    #[must_use]
    pub fn path(&self) -> Vec<String> {
        let mut path = self.namespace.clone();
        path.push(self.name.clone());
        path
    }

    /// Positional arguments in declaration order.
    pub fn positionals(&self) -> impl Iterator<Item = &ArgSpec> {
        self.args.iter().filter(|arg| arg.is_positional())
    }

    /// Flag arguments in declaration order.
    pub fn flags(&self) -> impl Iterator<Item = &ArgSpec> {
        self.args.iter().filter(|arg| !arg.is_positional())
    }
}
