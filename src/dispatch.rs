//! Routing of parsed invocations
//!
//! The [`Dispatcher`] builds the CLI once from a [`LoadedConfig`]. Each invocation is either the
//! built-in `init`, which creates the environment, or a configured command, whose task settings
//! and parameters are resolved before the environment is loaded and the workflow engine runs.

use std::ffi::OsString;

use clap::{ArgMatches, Command as ClapCommand};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::LoadedConfig;
use crate::cli::{INIT_COMMAND, InitArgs, InputsError, build_cli, find_invocation, parsed_args};
use crate::commands::command::CommandSpec;
use crate::commands::task::TaskConfig;
use crate::config_file::ConfigError;
use crate::engine::{EngineError, ExecutionRequest, WorkflowEngine};
use crate::environment::Environment;
use crate::environment::lifecycle::{Lifecycle, LifecycleError};
use crate::environment::storage::Resources;
use crate::functions::{ResolveError, resolve_init_inputs, resolve_parameters};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Cli(#[from] clap::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Unable to resolve parameters of `{command}`: {source}")]
    Parameters {
        command: String,
        #[source]
        source: ResolveError,
    },
    #[error("Unable to resolve configured inputs: {0}")]
    ConfigInputs(#[source] ResolveError),
    #[error("Configured inputs must resolve to a mapping, got: {0}")]
    InvalidConfigInputs(Value),
    #[error(transparent)]
    Inputs(#[from] InputsError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("No command matches `{0}`")]
    UnknownCommand(String),
}

pub struct Dispatcher<E> {
    config: LoadedConfig,
    cli: ClapCommand,
    lifecycle: Lifecycle,
    engine: E,
}

impl<E: WorkflowEngine> Dispatcher<E> {
    /// Build the CLI for `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the command tree cannot be turned into a CLI.
    pub fn new(config: LoadedConfig, engine: E) -> Result<Self, ConfigError> {
        let cli = build_cli(&config.name, config.description.as_deref(), &config.root)?;
        let lifecycle = Lifecycle::new(&config.storage_dir, &config.blueprint_path);
        Ok(Dispatcher {
            config,
            cli,
            lifecycle,
            engine,
        })
    }

    #[must_use]
    pub fn config(&self) -> &LoadedConfig {
        &self.config
    }

    #[must_use]
    pub fn command(&self) -> &ClapCommand {
        &self.cli
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Parse `argv`, including the program name.
    ///
    /// # Errors
    ///
    /// Returns `clap::Error` for invalid arguments, and for `--help`/`--version`.
    pub fn parse<I, T>(&self, argv: I) -> Result<ArgMatches, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        self.cli.clone().try_get_matches_from(argv)
    }

    /// Run the invocation described by `matches`.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` if parameters cannot be resolved, the environment is missing or
    /// already initialized, or the workflow fails.
    pub fn dispatch(&self, matches: &ArgMatches) -> Result<(), DispatchError> {
        match matches.subcommand() {
            Some((INIT_COMMAND, sub_matches)) => {
                self.init(&InitArgs::from_matches(sub_matches)?)?;
                Ok(())
            }
            Some((name, _)) => {
                let (command, sub_matches) = find_invocation(&self.config.root, matches)
                    .ok_or_else(|| DispatchError::UnknownCommand(name.to_string()))?;
                self.run_command(command, sub_matches)
            }
            None => Err(DispatchError::UnknownCommand(String::new())),
        }
    }

    /// Parse and dispatch in one step.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::parse`] and [`Dispatcher::dispatch`].
    pub fn run_from<I, T>(&self, argv: I) -> Result<(), DispatchError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self.parse(argv)?;
        self.dispatch(&matches)
    }

    /// Create the environment from the configured and given inputs.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` for unresolvable or malformed inputs, and lifecycle errors.
    pub fn init(&self, args: &InitArgs) -> Result<Environment, DispatchError> {
        let mut inputs = self.configured_inputs()?;
        inputs.extend(args.parse_inputs()?);

        let resources = if args.editable {
            Resources::Link
        } else {
            Resources::Copy
        };
        let environment = self.lifecycle.init(&inputs, args.reset, resources)?;
        match environment.outputs() {
            Ok(outputs) => {
                for (name, value) in outputs {
                    info!("Output `{name}`: {value}");
                }
            }
            Err(e) => warn!("Unable to evaluate blueprint outputs: {e}"),
        }
        Ok(environment)
    }

    fn configured_inputs(&self) -> Result<Map<String, Value>, DispatchError> {
        match resolve_init_inputs(&self.config.inputs, &self.config.document)
            .map_err(DispatchError::ConfigInputs)?
        {
            Value::Null => Ok(Map::new()),
            Value::Object(inputs) => Ok(inputs),
            other => Err(DispatchError::InvalidConfigInputs(other)),
        }
    }

    fn run_command(&self, command: &CommandSpec, matches: &ArgMatches) -> Result<(), DispatchError> {
        let path = command.path().join(" ");
        let args = parsed_args(command, matches);
        let task = TaskConfig::resolve(&[&self.config.task, &command.task]);
        let parameters =
            resolve_parameters(&command.parameters, &args).map_err(|source| {
                DispatchError::Parameters {
                    command: path.clone(),
                    source,
                }
            })?;
        debug!("Command `{path}` resolved parameters {parameters} with {task:?}");

        let environment = self.lifecycle.load()?;
        self.engine.execute(
            &environment,
            &ExecutionRequest {
                workflow: &command.workflow,
                parameters: &parameters,
                task,
            },
        )?;
        Ok(())
    }
}
