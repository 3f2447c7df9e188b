use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::environment::Environment;
use crate::environment::blueprint::{Blueprint, BlueprintError};

/// File holding the persisted environment, inside the environment directory
pub const STATE_FILE: &str = "environment.json";
/// Directory the blueprint's files are copied to, inside the environment directory
pub const RESOURCES_DIR: &str = "resources";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Environment `{name}` not found in {} (run `init` first)", .dir.display())]
    EnvironmentNotFound { name: String, dir: PathBuf },
    #[error("Environment `{name}` already exists in {}", .dir.display())]
    AlreadyExists { name: String, dir: PathBuf },
    #[error("Invalid environment name `{0}`")]
    InvalidName(String),
    #[error("Storage error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Corrupt environment state {}: {source}", .path.display())]
    State {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Blueprint(#[from] BlueprintError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// How the blueprint's directory ends up in the environment's resources directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Resources {
    /// Snapshot the directory at init time
    #[default]
    Copy,
    /// Symlink to the directory, so edits to the blueprint show up without a reset
    Link,
}

/// Environments stored as plain files below one storage directory
///
/// ```text
/// <storage_dir>/<name>/environment.json
/// <storage_dir>/<name>/resources/...
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStorage {
    storage_dir: PathBuf,
}

impl FileStorage {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        FileStorage {
            storage_dir: storage_dir.into(),
        }
    }

    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    #[must_use]
    pub fn environment_dir(&self, name: &str) -> PathBuf {
        self.storage_dir.join(name)
    }

    /// Whether an environment was initialized, i.e. its state file exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.environment_dir(name).join(STATE_FILE).is_file()
    }

    /// Read a previously saved environment. Never modifies the storage.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::EnvironmentNotFound` if `init` never ran, or `Io`/`State` if
    /// the state file cannot be read.
    pub fn load(&self, name: &str) -> Result<Environment, StorageError> {
        validate_name(name)?;
        let dir = self.environment_dir(name);
        let state_path = dir.join(STATE_FILE);
        if !state_path.is_file() {
            return Err(StorageError::EnvironmentNotFound {
                name: name.to_string(),
                dir: self.storage_dir.clone(),
            });
        }
        let contents = fs::read_to_string(&state_path).map_err(io_error(&state_path))?;
        let mut environment: Environment =
            serde_json::from_str(&contents).map_err(|source| StorageError::State {
                path: state_path.clone(),
                source,
            })?;
        environment.dir = dir;
        Ok(environment)
    }

    /// Persist the environment state, replacing the state file atomically.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` or `StorageError::State`.
    pub fn save(&self, environment: &Environment) -> Result<(), StorageError> {
        let dir = self.environment_dir(&environment.name);
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        write_state(&dir, environment)
    }

    /// Delete the environment directory and everything in it.
    ///
    /// A linked resources directory is removed as a link; its target is left alone.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the directory cannot be removed.
    pub fn remove(&self, name: &str) -> Result<(), StorageError> {
        validate_name(name)?;
        let dir = self.environment_dir(name);
        if dir.exists() {
            info!("Removing environment {}", dir.display());
            fs::remove_dir_all(&dir).map_err(io_error(&dir))?;
        }
        Ok(())
    }
}

fn write_state(dir: &Path, environment: &Environment) -> Result<(), StorageError> {
    let state_path = dir.join(STATE_FILE);
    let contents =
        serde_json::to_string_pretty(environment).map_err(|source| StorageError::State {
            path: state_path.clone(),
            source,
        })?;
    let tmp_path = dir.join(format!(".{STATE_FILE}.tmp"));
    fs::write(&tmp_path, contents).map_err(io_error(&tmp_path))?;
    fs::rename(&tmp_path, &state_path).map_err(io_error(&state_path))?;
    Ok(())
}

fn validate_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

/// Create environment `name` from the blueprint at `blueprint_path` and `inputs`.
///
/// The blueprint's directory is copied into the environment's resources directory, skipping
/// hidden entries and the storage directory itself, or linked with [`Resources::Link`]. The
/// environment is assembled in a hidden directory next to its final location and only moved
/// into place once its state is written, so a failed init leaves nothing behind.
///
/// # Errors
///
/// Returns `StorageError::AlreadyExists` if the environment was initialized, and blueprint,
/// input or I/O errors otherwise.
pub fn init_env(
    blueprint_path: &Path,
    inputs: &Map<String, Value>,
    name: &str,
    storage: &FileStorage,
    resources: Resources,
) -> Result<Environment, StorageError> {
    validate_name(name)?;
    if storage.exists(name) {
        return Err(StorageError::AlreadyExists {
            name: name.to_string(),
            dir: storage.storage_dir().to_path_buf(),
        });
    }

    let blueprint = Blueprint::from_file(blueprint_path)?;
    let inputs = blueprint.effective_inputs(inputs)?;

    let environment = Environment {
        id: Uuid::new_v4(),
        name: name.to_string(),
        dir: storage.environment_dir(name),
        blueprint_path: blueprint_path.to_path_buf(),
        blueprint,
        inputs,
    };

    let staging = storage
        .storage_dir()
        .join(format!(".{name}.{}.tmp", environment.id));
    fs::create_dir_all(&staging).map_err(io_error(&staging))?;
    if let Err(e) = stage(blueprint_path, storage, resources, &staging, &environment) {
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            warn!("Failed to remove {}: {cleanup}", staging.display());
        }
        return Err(e);
    }

    if environment.dir.exists() {
        warn!(
            "Removing incomplete environment {}",
            environment.dir.display()
        );
        fs::remove_dir_all(&environment.dir).map_err(io_error(&environment.dir))?;
    }
    if let Err(source) = fs::rename(&staging, &environment.dir) {
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            warn!("Failed to remove {}: {cleanup}", staging.display());
        }
        return Err(io_error(&environment.dir)(source));
    }
    info!(
        "Initialized environment `{}` ({}) in {}",
        environment.name,
        environment.id,
        environment.dir.display()
    );
    Ok(environment)
}

fn stage(
    blueprint_path: &Path,
    storage: &FileStorage,
    resources: Resources,
    staging: &Path,
    environment: &Environment,
) -> Result<(), StorageError> {
    let blueprint_dir = match blueprint_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let target = staging.join(RESOURCES_DIR);
    match resources {
        Resources::Copy => {
            fs::create_dir_all(&target).map_err(io_error(&target))?;
            let storage_dir = storage
                .storage_dir()
                .canonicalize()
                .map_err(io_error(storage.storage_dir()))?;
            copy_resources(blueprint_dir, &target, &storage_dir)?;
        }
        Resources::Link => {
            let blueprint_dir = blueprint_dir
                .canonicalize()
                .map_err(io_error(blueprint_dir))?;
            debug!("Linking {} to {}", target.display(), blueprint_dir.display());
            link_dir(&blueprint_dir, &target).map_err(io_error(&target))?;
        }
    }
    write_state(staging, environment)
}

#[cfg(unix)]
fn link_dir(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn link_dir(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(original, link)
}

/// Load environment `name` from `storage`.
///
/// # Errors
///
/// Returns `StorageError::EnvironmentNotFound` if it was never initialized.
pub fn load_env(name: &str, storage: &FileStorage) -> Result<Environment, StorageError> {
    storage.load(name)
}

fn copy_resources(source: &Path, target: &Path, skip: &Path) -> Result<(), StorageError> {
    for entry in fs::read_dir(source).map_err(io_error(source))? {
        let entry = entry.map_err(io_error(source))?;
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if path.canonicalize().is_ok_and(|canonical| canonical.starts_with(skip)) {
            continue;
        }

        let destination = target.join(entry.file_name());
        let file_type = entry.file_type().map_err(io_error(&path))?;
        if file_type.is_dir() || (file_type.is_symlink() && path.is_dir()) {
            fs::create_dir_all(&destination).map_err(io_error(&destination))?;
            copy_resources(&path, &destination, skip)?;
        } else {
            debug!("Copying {} to {}", path.display(), destination.display());
            fs::copy(&path, &destination).map_err(io_error(&path))?;
        }
    }
    Ok(())
}
