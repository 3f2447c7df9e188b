use crate::commands::command::CommandSpec;

/// A node of the command tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Command(CommandSpec),
    Namespace(NamespaceSpec),
}

impl Node {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Node::Command(command) => &command.name,
            Node::Namespace(namespace) => &namespace.name,
        }
    }
}

/// Interior node grouping commands and namespaces under a shared path segment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NamespaceSpec {
    pub name: String,
    /// Names of the enclosing namespaces below the root
    pub namespace: Vec<String>,
    pub children: Vec<Node>,
}

impl NamespaceSpec {
    /// Path of this namespace below the root; the root itself has an empty path.
    #[must_use]
    pub fn path(&self) -> Vec<String> {
        if self.namespace.is_empty() && self.name.is_empty() {
            return Vec::new();
        }
        let mut path = self.namespace.clone();
        path.push(self.name.clone());
        path
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.children.iter().filter_map(|child| match child {
            Node::Command(command) => Some(command),
            Node::Namespace(_) => None,
        })
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &NamespaceSpec> {
        self.children.iter().filter_map(|child| match child {
            Node::Namespace(namespace) => Some(namespace),
            Node::Command(_) => None,
        })
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name() == name)
    }

    /// Look up a command by its path below this namespace.
    #[must_use]
    pub fn find_command<S: AsRef<str>>(&self, path: &[S]) -> Option<&CommandSpec> {
        let (last, parents) = path.split_last()?;
        let mut namespace = self;
        for segment in parents {
            match namespace.child(segment.as_ref())? {
                Node::Namespace(child) => namespace = child,
                Node::Command(_) => return None,
            }
        }
        match namespace.child(last.as_ref())? {
            Node::Command(command) => Some(command),
            Node::Namespace(_) => None,
        }
    }

    /// Returns a flattened list of all commands in this namespace and its children
    #[must_use]
    pub fn all_commands(&self) -> Vec<&CommandSpec> {
        self.children
            .iter()
            .flat_map(|child| match child {
                Node::Command(command) => vec![command],
                Node::Namespace(namespace) => namespace.all_commands(),
            })
            .collect()
    }

    /// Every leaf command path, e.g. `["command1"]`, `["nested", "command2"]`.
    #[must_use]
    pub fn command_paths(&self) -> Vec<Vec<String>> {
        self.all_commands()
            .into_iter()
            .map(CommandSpec::path)
            .collect()
    }
}
