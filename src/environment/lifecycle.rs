use std::path::PathBuf;

use log::{debug, info};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::environment::storage::{FileStorage, Resources, StorageError, init_env, load_env};
use crate::environment::{ENVIRONMENT_NAME, Environment, search_path};

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Environment is already initialized in {} (use --reset to re-initialize)", .0.display())]
    AlreadyInitialized(PathBuf),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Creates, resets and loads the CLI's environment
#[derive(Debug, Clone)]
pub struct Lifecycle {
    storage: FileStorage,
    blueprint_path: PathBuf,
    name: String,
}

impl Lifecycle {
    pub fn new(storage_dir: impl Into<PathBuf>, blueprint_path: impl Into<PathBuf>) -> Self {
        Lifecycle {
            storage: FileStorage::new(storage_dir),
            blueprint_path: blueprint_path.into(),
            name: ENVIRONMENT_NAME.to_string(),
        }
    }

    #[must_use]
    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.storage.exists(&self.name)
    }

    /// Create the environment. An existing one is only replaced when `reset` is set, in
    /// which case its directory is removed entirely first. `resources` decides whether the
    /// blueprint directory is copied or linked.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::AlreadyInitialized` if the environment exists and `reset` is
    /// false, and storage errors from creating the environment.
    pub fn init(
        &self,
        inputs: &Map<String, Value>,
        reset: bool,
        resources: Resources,
    ) -> Result<Environment, LifecycleError> {
        if self.is_initialized() {
            if !reset {
                return Err(LifecycleError::AlreadyInitialized(
                    self.storage.environment_dir(&self.name),
                ));
            }
            info!("Resetting environment `{}`", self.name);
            self.storage.remove(&self.name)?;
        }
        debug!(
            "Initializing environment `{}` from {}",
            self.name,
            self.blueprint_path.display()
        );
        Ok(init_env(
            &self.blueprint_path,
            inputs,
            &self.name,
            &self.storage,
            resources,
        )?)
    }

    /// Load the environment and make its resources directory available to workflows.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::EnvironmentNotFound` (wrapped) if `init` never ran.
    pub fn load(&self) -> Result<Environment, LifecycleError> {
        let environment = load_env(&self.name, &self.storage)?;
        search_path::register(&environment.resources_dir());
        Ok(environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn lifecycle(dir: &Path) -> Lifecycle {
        std::fs::write(
            dir.join("blueprint.yaml"),
            "inputs:\n  input:\n    default: x\noutputs:\n  output:\n    value: {get_input: input}\nworkflows:\n  workflow1: 'true'\n",
        )
        .unwrap();
        Lifecycle::new(dir.join(".local"), dir.join("blueprint.yaml"))
    }

    #[test]
    fn test_init_twice_without_reset_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        lifecycle.init(&Map::new(), false, Resources::Copy).unwrap();
        assert!(matches!(
            lifecycle.init(&Map::new(), false, Resources::Copy),
            Err(LifecycleError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_init_with_reset_replaces_environment() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        let first = lifecycle.init(&Map::new(), false, Resources::Copy).unwrap();

        let inputs: Map<String, Value> = [("input".to_string(), json!("y"))].into_iter().collect();
        let second = lifecycle.init(&inputs, true, Resources::Copy).unwrap();
        assert_ne!(first.id, second.id);

        let environments: Vec<_> = std::fs::read_dir(lifecycle.storage().storage_dir())
            .unwrap()
            .collect();
        assert_eq!(environments.len(), 1);

        let loaded = lifecycle.load().unwrap();
        assert_eq!(loaded.id, second.id);
        assert_eq!(loaded.outputs().unwrap()["output"], json!("y"));
    }

    #[test]
    fn test_reset_on_fresh_storage() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        assert!(lifecycle.init(&Map::new(), true, Resources::Copy).is_ok());
    }

    #[test]
    fn test_load_before_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        assert!(matches!(
            lifecycle.load(),
            Err(LifecycleError::Storage(StorageError::EnvironmentNotFound { .. }))
        ));
    }

    #[test]
    fn test_load_is_repeatable_and_registers_resources() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        lifecycle.init(&Map::new(), false, Resources::Copy).unwrap();

        let first = lifecycle.load().unwrap();
        let second = lifecycle.load().unwrap();
        assert_eq!(first, second);
        assert!(search_path::entries().contains(&first.resources_dir()));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_init_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        let dangling = dir.path().join("dangling");
        std::os::unix::fs::symlink(dir.path().join("missing"), &dangling).unwrap();

        assert!(lifecycle.init(&Map::new(), false, Resources::Copy).is_err());
        assert!(!lifecycle.is_initialized());
        assert!(matches!(
            lifecycle.load(),
            Err(LifecycleError::Storage(StorageError::EnvironmentNotFound { .. }))
        ));

        std::fs::remove_file(&dangling).unwrap();
        lifecycle.init(&Map::new(), false, Resources::Copy).unwrap();
        assert!(lifecycle.is_initialized());
        assert!(lifecycle.load().is_ok());
    }

    #[test]
    fn test_reset_keeps_linked_blueprint() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        let first = lifecycle.init(&Map::new(), false, Resources::Link).unwrap();
        assert!(std::fs::read_link(first.resources_dir()).is_ok());

        let second = lifecycle.init(&Map::new(), true, Resources::Copy).unwrap();
        assert!(dir.path().join("blueprint.yaml").is_file());
        assert!(std::fs::read_link(second.resources_dir()).is_err());
        assert!(second.resources_dir().join("blueprint.yaml").is_file());
    }
}
