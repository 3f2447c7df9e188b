//! Command-line surface generated from the command tree
//!
//! Every namespace becomes a clap subcommand that requires a further subcommand, and every
//! command becomes a leaf subcommand whose arguments follow the declaration order of its
//! `args`. Everything that clap would only reject when parsing (clashing flags, ambiguous
//! positionals) is checked here so that a broken config fails before any command runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::builder::{BoolValueParser, PossibleValuesParser, ValueParser, ValueRange};
use clap::parser::ValueSource;
use clap::{Arg, ArgAction as ClapAction, ArgMatches, Args, Command as ClapCommand, FromArgMatches};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::commands::arg::{ArgAction, ArgSpec, Nargs, ValueType};
use crate::commands::command::CommandSpec;
use crate::commands::namespace::{NamespaceSpec, Node};
use crate::config_file::ConfigError;

pub const INIT_COMMAND: &str = "init";
pub const VERBOSE: &str = "verbose";
pub const LOG_FILE: &str = "log_file";

const RESERVED_LONG: [&str; 3] = ["help", "verbose", "log-file"];
const RESERVED_SHORT: [char; 2] = ['h', 'v'];
const RESERVED_IDS: [&str; 3] = ["help", VERBOSE, LOG_FILE];
/// Subcommand clap adds to every command that has subcommands
const HELP_COMMAND: &str = "help";

/// Errors in the `--inputs` values of `init`
#[derive(Error, Debug)]
pub enum InputsError {
    #[error("invalid input `{0}`: expected key=value")]
    InvalidPair(String),
    #[error("inputs must be a mapping: {0}")]
    NotAMapping(String),
    #[error("unable to read inputs file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse inputs file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Build the full CLI: global flags, the built-in `init` command and the command tree.
///
/// # Errors
///
/// Returns `ConfigError::Validation` if a command cannot be expressed as CLI arguments, or
/// the tree uses the reserved `init` name at its root.
pub fn build_cli(
    name: &str,
    about: Option<&str>,
    root: &NamespaceSpec,
) -> Result<ClapCommand, ConfigError> {
    if root.child(INIT_COMMAND).is_some() {
        return Err(ConfigError::Validation(format!(
            "`{INIT_COMMAND}` is a built-in command and cannot be configured"
        )));
    }
    let cli = create_root_command(name, about).subcommand(init_command());
    add_children(cli, root)
}

fn create_root_command(name: &str, about: Option<&str>) -> ClapCommand {
    let mut root = ClapCommand::new(name.to_string())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(VERBOSE)
                .short('v')
                .long("verbose")
                .help("Verbose logging")
                .global(true)
                .action(ClapAction::SetTrue),
        )
        .arg(
            Arg::new(LOG_FILE)
                .long("log-file")
                .value_name("PATH")
                .help("Also write log messages to this file")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
        );
    if let Some(about) = about {
        root = root.about(about.to_string());
    }
    root
}

/// The built-in `init` command.
#[must_use]
pub fn init_command() -> ClapCommand {
    InitArgs::augment_args(ClapCommand::new(INIT_COMMAND))
        .about("Initialize the local environment")
}

fn add_children(
    mut parent: ClapCommand,
    namespace: &NamespaceSpec,
) -> Result<ClapCommand, ConfigError> {
    for child in &namespace.children {
        if child.name() == HELP_COMMAND {
            let mut path = namespace.path();
            path.push(HELP_COMMAND.to_string());
            return Err(ConfigError::Validation(format!(
                "`{}`: `{HELP_COMMAND}` is a built-in command and cannot be configured",
                path.join(".")
            )));
        }
        let subcommand = match child {
            Node::Command(command) => build_command(command)?,
            Node::Namespace(namespace) => build_namespace(namespace)?,
        };
        parent = parent.subcommand(subcommand);
    }
    Ok(parent)
}

fn build_namespace(namespace: &NamespaceSpec) -> Result<ClapCommand, ConfigError> {
    let command = ClapCommand::new(namespace.name.clone())
        .subcommand_required(true)
        .arg_required_else_help(true);
    add_children(command, namespace)
}

/// Build the leaf subcommand of `spec`: positionals in declaration order, then flags.
///
/// # Errors
///
/// Returns `ConfigError::Validation` for clashing destinations or flags and for positionals
/// the parser could not tell apart.
pub fn build_command(spec: &CommandSpec) -> Result<ClapCommand, ConfigError> {
    validate_args(spec)?;

    let mut command = ClapCommand::new(spec.name.clone()).args_override_self(true);
    if let Some(help) = &spec.help {
        command = command.about(help.clone());
    }
    for (index, arg) in spec.positionals().enumerate() {
        command = command.arg(build_arg(arg).index(index + 1));
    }
    for arg in spec.flags() {
        command = command.arg(build_arg(arg));
    }
    Ok(command)
}

fn validate_args(spec: &CommandSpec) -> Result<(), ConfigError> {
    let command = spec.path().join(".");
    let invalid = |message: String| -> Result<(), ConfigError> {
        Err(ConfigError::Validation(format!(
            "command `{command}`: {message}"
        )))
    };

    let mut dests = HashSet::new();
    let mut longs = HashSet::new();
    let mut shorts = HashSet::new();
    for arg in &spec.args {
        if RESERVED_IDS.contains(&arg.dest.as_str()) || !dests.insert(arg.dest.as_str()) {
            return invalid(format!(
                "destination `{}` of `{}` is already in use",
                arg.dest,
                arg.display_name()
            ));
        }
        for long in arg.long_names() {
            if RESERVED_LONG.contains(&long) || !longs.insert(long) {
                return invalid(format!("flag `--{long}` is already in use"));
            }
        }
        for short in arg.short_names() {
            if RESERVED_SHORT.contains(&short) || !shorts.insert(short) {
                return invalid(format!("flag `-{short}` is already in use"));
            }
        }
    }

    let positionals: Vec<&ArgSpec> = spec.positionals().collect();
    let mut optional_seen = false;
    for (index, arg) in positionals.iter().enumerate() {
        if arg.required && optional_seen {
            return invalid(format!(
                "required positional `{}` follows an optional one",
                arg.dest
            ));
        }
        optional_seen |= !arg.required;
        let variadic = matches!(arg.nargs, Some(Nargs::ZeroOrMore | Nargs::OneOrMore))
            || arg.action == ArgAction::Append;
        if variadic && index + 1 != positionals.len() {
            return invalid(format!(
                "positional `{}` takes a variable number of values and must be last",
                arg.dest
            ));
        }
    }
    Ok(())
}

fn build_arg(spec: &ArgSpec) -> Arg {
    let mut arg = Arg::new(spec.dest.clone()).required(spec.required);

    let mut longs = spec.long_names();
    if let Some(long) = longs.next() {
        arg = arg.long(long.to_string());
        for alias in longs {
            arg = arg.visible_alias(alias.to_string());
        }
    }
    let mut shorts = spec.short_names();
    if let Some(short) = shorts.next() {
        arg = arg.short(short);
        for alias in shorts {
            arg = arg.visible_short_alias(alias);
        }
    }
    if let Some(help) = &spec.help {
        arg = arg.help(help.clone());
    }
    if let Some(metavar) = &spec.metavar {
        arg = arg.value_name(metavar.clone());
    }

    match spec.action {
        ArgAction::StoreTrue => arg.action(ClapAction::SetTrue),
        ArgAction::StoreFalse => arg.action(ClapAction::SetFalse),
        ArgAction::Count => arg.action(ClapAction::Count),
        ArgAction::Store | ArgAction::Append => {
            let action = if spec.action == ArgAction::Append {
                ClapAction::Append
            } else {
                ClapAction::Set
            };
            arg.action(action)
                .num_args(value_range(spec))
                .value_parser(value_parser(spec))
        }
    }
}

fn value_range(spec: &ArgSpec) -> ValueRange {
    match spec.nargs {
        None => ValueRange::new(1),
        Some(Nargs::Optional) if spec.is_positional() => ValueRange::new(1),
        Some(Nargs::Optional) => ValueRange::new(0..=1),
        Some(Nargs::ZeroOrMore) => ValueRange::new(0..),
        Some(Nargs::OneOrMore) => ValueRange::new(1..),
        Some(Nargs::Exactly(n)) => ValueRange::new(n),
    }
}

fn value_parser(spec: &ArgSpec) -> ValueParser {
    if !spec.choices.is_empty() {
        return PossibleValuesParser::new(spec.choices.clone()).into();
    }
    match spec.value_type {
        ValueType::Str => ValueParser::string(),
        ValueType::Int => clap::value_parser!(i64).into(),
        ValueType::Float => clap::value_parser!(f64).into(),
        ValueType::Bool => BoolValueParser::new().into(),
    }
}

/// Find the invoked leaf command and its matches, following nested namespaces.
#[must_use]
pub fn find_invocation<'a>(
    root: &'a NamespaceSpec,
    matches: &'a ArgMatches,
) -> Option<(&'a CommandSpec, &'a ArgMatches)> {
    let mut namespace = root;
    let mut current = matches;
    loop {
        let (name, sub_matches) = current.subcommand()?;
        match namespace.child(name)? {
            Node::Command(command) => return Some((command, sub_matches)),
            Node::Namespace(child) => {
                namespace = child;
                current = sub_matches;
            }
        }
    }
}

/// Global options, read from the innermost subcommand so they may be given at any level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
}

impl GlobalOptions {
    #[must_use]
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let mut current = matches;
        while let Some((_, sub_matches)) = current.subcommand() {
            current = sub_matches;
        }
        GlobalOptions {
            verbose: current
                .try_get_one::<bool>(VERBOSE)
                .ok()
                .flatten()
                .copied()
                .unwrap_or(false),
            log_file: current
                .try_get_one::<PathBuf>(LOG_FILE)
                .ok()
                .flatten()
                .cloned(),
        }
    }
}

/// Collect every declared argument of `spec` into a mapping keyed by destination.
///
/// Arguments that were not given map to their `default`, or null.
#[must_use]
pub fn parsed_args(spec: &CommandSpec, matches: &ArgMatches) -> Map<String, Value> {
    spec.args
        .iter()
        .map(|arg| (arg.dest.clone(), arg_value(arg, matches)))
        .collect()
}

fn arg_value(spec: &ArgSpec, matches: &ArgMatches) -> Value {
    let id = spec.dest.as_str();
    let given = matches.value_source(id) == Some(ValueSource::CommandLine);
    let default = || spec.default.clone();

    match spec.action {
        ArgAction::StoreTrue => {
            if given {
                Value::Bool(true)
            } else {
                default().unwrap_or(Value::Bool(false))
            }
        }
        ArgAction::StoreFalse => {
            if given {
                Value::Bool(false)
            } else {
                default().unwrap_or(Value::Bool(true))
            }
        }
        ArgAction::Count => match matches.get_count(id) {
            0 => default().unwrap_or(Value::Null),
            count => Value::from(count),
        },
        ArgAction::Store | ArgAction::Append => {
            if !given {
                return default().unwrap_or_else(|| {
                    if spec.is_positional() && spec.nargs == Some(Nargs::ZeroOrMore) {
                        Value::Array(Vec::new())
                    } else {
                        Value::Null
                    }
                });
            }
            let raw: Vec<String> = matches
                .get_raw(id)
                .map(|values| {
                    values
                        .map(|value| value.to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            if spec.is_list() {
                Value::Array(raw.iter().map(|v| spec.value_type.convert(v)).collect())
            } else {
                match raw.last() {
                    Some(value) => spec.value_type.convert(value),
                    // `--flag` given without a value (nargs `?`)
                    None => spec.constant.clone().unwrap_or(Value::Null),
                }
            }
        }
    }
}

/// Arguments of the built-in `init` command
#[derive(Args, Debug, Default)]
pub struct InitArgs {
    /// Inputs as key=value pairs separated by ';', an inline YAML/JSON mapping or a path to a
    /// YAML/JSON file (can be repeated)
    #[arg(short, long, value_name = "INPUTS")]
    pub inputs: Vec<String>,

    /// Remove the existing environment before initializing
    #[arg(long)]
    pub reset: bool,

    /// Link the blueprint directory into the environment instead of copying it
    #[arg(long)]
    pub editable: bool,
}

impl InitArgs {
    /// # Errors
    ///
    /// Returns `clap::Error` if `matches` do not come from [`init_command`].
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, clap::Error> {
        InitArgs::from_arg_matches(matches)
    }

    /// Merge all `--inputs` values into one mapping; later values win.
    ///
    /// # Errors
    ///
    /// Returns `InputsError` for malformed pairs, non-mapping documents and unreadable files.
    pub fn parse_inputs(&self) -> Result<Map<String, Value>, InputsError> {
        let mut inputs = Map::new();
        for raw in &self.inputs {
            inputs.extend(parse_input_value(raw)?);
        }
        Ok(inputs)
    }
}

fn parse_input_value(raw: &str) -> Result<Map<String, Value>, InputsError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }

    let path = Path::new(raw);
    if path.is_file() {
        let contents = std::fs::read_to_string(path).map_err(|source| InputsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value =
            serde_yaml::from_str(&contents).map_err(|source| InputsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        return match document {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            _ => Err(InputsError::NotAMapping(raw.to_string())),
        };
    }

    if raw.starts_with('{') {
        return match serde_yaml::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(InputsError::NotAMapping(raw.to_string())),
        };
    }

    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| -> Result<(String, Value), InputsError> {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| InputsError::InvalidPair(pair.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(InputsError::InvalidPair(pair.to_string()));
            }
            Ok((key.to_string(), Value::String(value.to_string())))
        })
        .collect()
}
