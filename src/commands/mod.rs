//! Command tree built from the configuration document
//!
//! The `commands` section of the config is a nested mapping. Every entry that declares a
//! `workflow` is a leaf [`command::CommandSpec`]; every other entry is a
//! [`namespace::NamespaceSpec`] grouping further entries under its name. The tree is built
//! once at startup and never mutated afterwards.
//!
//! Task settings are layered rather than inherited through namespaces: built-in defaults,
//! then the config-wide `task` section, then the command's own `task` section.

pub mod arg;
pub mod command;
pub mod namespace;
pub mod task;
