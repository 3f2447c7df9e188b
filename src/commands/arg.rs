use serde_json::{Map, Value};
use thiserror::Error;

/// Problems with a single `args` entry of a command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgSpecError {
    #[error("argument entry is missing `name`")]
    MissingName,
    #[error("`name` must be a string or a non-empty list of strings")]
    InvalidNameList,
    #[error("invalid argument name `{0}`")]
    InvalidName(String),
    #[error("argument `{0}` mixes positional and flag names")]
    MixedNames(String),
    #[error("positional argument `{0}` can only have one name")]
    MultiplePositionalNames(String),
    #[error("unknown option `{option}` for argument `{arg}`")]
    UnknownOption { arg: String, option: String },
    #[error("invalid value for option `{option}` of argument `{arg}`: {message}")]
    InvalidOption {
        arg: String,
        option: String,
        message: String,
    },
}

const OPTIONS: [&str; 11] = [
    "name", "help", "default", "action", "type", "choices", "nargs", "const", "required",
    "metavar", "dest",
];

/// What the parser does with an argument's occurrences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgAction {
    #[default]
    Store,
    StoreTrue,
    StoreFalse,
    Append,
    Count,
}

impl ArgAction {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "store" => Some(ArgAction::Store),
            "store_true" => Some(ArgAction::StoreTrue),
            "store_false" => Some(ArgAction::StoreFalse),
            "append" => Some(ArgAction::Append),
            "count" => Some(ArgAction::Count),
            _ => None,
        }
    }

    /// Whether occurrences carry values (as opposed to switches and counters).
    #[must_use]
    pub fn takes_values(self) -> bool {
        matches!(self, ArgAction::Store | ArgAction::Append)
    }
}

/// Type the raw command-line strings are converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    #[default]
    Str,
    Int,
    Float,
    Bool,
}

impl ValueType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "str" | "string" => Some(ValueType::Str),
            "int" | "integer" => Some(ValueType::Int),
            "float" | "number" => Some(ValueType::Float),
            "bool" | "boolean" => Some(ValueType::Bool),
            _ => None,
        }
    }

    /// Convert a raw value. The parser has already validated it, so this only falls back to a
    /// string for values it could not have produced.
    #[must_use]
    pub fn convert(self, raw: &str) -> Value {
        let converted = match self {
            ValueType::Str => None,
            ValueType::Int => raw.parse::<i64>().ok().map(Value::from),
            ValueType::Float => raw.parse::<f64>().ok().and_then(|f| {
                serde_json::Number::from_f64(f).map(Value::Number)
            }),
            ValueType::Bool => raw.parse::<bool>().ok().map(Value::Bool),
        };
        converted.unwrap_or_else(|| Value::String(raw.to_string()))
    }
}

/// How many values one occurrence consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nargs {
    /// `?`: zero or one value
    Optional,
    /// `*`
    ZeroOrMore,
    /// `+`
    OneOrMore,
    Exactly(usize),
}

impl Nargs {
    /// Whether the parsed value is a list rather than a scalar.
    #[must_use]
    pub fn is_list(self) -> bool {
        !matches!(self, Nargs::Optional)
    }
}

/// One invocation-time argument of a command
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSpec {
    pub names: Vec<String>,
    /// Key of the parsed value, as seen by `{arg: ...}`
    pub dest: String,
    pub action: ArgAction,
    pub value_type: ValueType,
    pub nargs: Option<Nargs>,
    pub default: Option<Value>,
    pub constant: Option<Value>,
    pub choices: Vec<String>,
    pub required: bool,
    pub help: Option<String>,
    pub metavar: Option<String>,
}

impl ArgSpec {
    #[must_use]
    pub fn is_positional(&self) -> bool {
        self.names.first().is_some_and(|name| !name.starts_with('-'))
    }

    pub fn long_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().filter_map(|name| name.strip_prefix("--"))
    }

    pub fn short_names(&self) -> impl Iterator<Item = char> + '_ {
        self.names
            .iter()
            .filter(|name| !name.starts_with("--"))
            .filter_map(|name| name.strip_prefix('-'))
            .filter_map(|short| short.chars().next())
    }

    /// Whether the parsed value is collected into a list.
    #[must_use]
    pub fn is_list(&self) -> bool {
        self.action == ArgAction::Append || self.nargs.is_some_and(Nargs::is_list)
    }

    /// Display name used in error messages.
    #[must_use]
    pub fn display_name(&self) -> String {
        display_name(&self.names)
    }
}

fn display_name(names: &[String]) -> String {
    names.join("/")
}

impl TryFrom<&Map<String, Value>> for ArgSpec {
    type Error = ArgSpecError;

    fn try_from(entry: &Map<String, Value>) -> Result<Self, Self::Error> {
        let names = parse_names(entry.get("name").ok_or(ArgSpecError::MissingName)?)?;
        let display = display_name(&names);
        if let Some(option) = entry.keys().find(|key| !OPTIONS.contains(&key.as_str())) {
            return Err(ArgSpecError::UnknownOption {
                arg: display,
                option: option.clone(),
            });
        }

        let invalid = |option: &str, message: &str| ArgSpecError::InvalidOption {
            arg: display.clone(),
            option: option.to_string(),
            message: message.to_string(),
        };
        let string_option = |option: &str| -> Result<Option<String>, ArgSpecError> {
            match entry.get(option) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(invalid(option, "expected a string")),
            }
        };

        let positional = !names[0].starts_with('-');
        let action = match string_option("action")? {
            None => ArgAction::default(),
            Some(name) => {
                ArgAction::parse(&name).ok_or_else(|| invalid("action", "unsupported action"))?
            }
        };
        let value_type = match string_option("type")? {
            None => ValueType::default(),
            Some(name) => ValueType::parse(&name).ok_or_else(|| invalid("type", "unsupported type"))?,
        };
        let nargs = entry
            .get("nargs")
            .map(|value| parse_nargs(value).ok_or_else(|| invalid("nargs", "expected ?, *, + or a positive integer")))
            .transpose()?;
        let choices = match entry.get("choices") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    Value::Bool(b) => Ok(b.to_string()),
                    _ => Err(invalid("choices", "choices must be scalars")),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(invalid("choices", "expected a list")),
        };
        let required = match entry.get("required") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(_) => return Err(invalid("required", "expected a boolean")),
        };

        if !action.takes_values() {
            for option in ["nargs", "type", "choices", "const"] {
                if entry.contains_key(option) {
                    return Err(invalid(option, "not allowed for switch and count actions"));
                }
            }
        }
        if positional {
            if !action.takes_values() {
                return Err(invalid("action", "positional arguments must take a value"));
            }
            if required.is_some() {
                return Err(invalid("required", "not allowed for positional arguments"));
            }
        }

        let dest = match string_option("dest")? {
            Some(dest) => dest,
            None => default_dest(&names),
        };
        let required = required.unwrap_or_else(|| {
            positional
                && entry.get("default").is_none()
                && !matches!(nargs, Some(Nargs::Optional | Nargs::ZeroOrMore))
        });

        Ok(ArgSpec {
            dest,
            action,
            value_type,
            nargs,
            default: entry.get("default").cloned(),
            constant: entry.get("const").cloned(),
            choices,
            required,
            help: string_option("help")?,
            metavar: string_option("metavar")?,
            names,
        })
    }
}

fn parse_names(value: &Value) -> Result<Vec<String>, ArgSpecError> {
    let names: Vec<String> = match value {
        Value::String(name) => vec![name.clone()],
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or(ArgSpecError::InvalidNameList)?,
        _ => return Err(ArgSpecError::InvalidNameList),
    };

    for name in &names {
        if !is_valid_name(name) {
            return Err(ArgSpecError::InvalidName(name.clone()));
        }
    }

    let flags = names.iter().filter(|name| name.starts_with('-')).count();
    if flags != 0 && flags != names.len() {
        return Err(ArgSpecError::MixedNames(display_name(&names)));
    }
    if flags == 0 && names.len() > 1 {
        return Err(ArgSpecError::MultiplePositionalNames(display_name(&names)));
    }
    Ok(names)
}

fn is_valid_name(name: &str) -> bool {
    let word = |s: &str| {
        !s.is_empty()
            && !s.starts_with('-')
            && s.chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    };
    if let Some(long) = name.strip_prefix("--") {
        word(long)
    } else if let Some(short) = name.strip_prefix('-') {
        short.chars().count() == 1 && word(short)
    } else {
        word(name)
    }
}

fn parse_nargs(value: &Value) -> Option<Nargs> {
    match value {
        Value::String(s) => match s.as_str() {
            "?" => Some(Nargs::Optional),
            "*" => Some(Nargs::ZeroOrMore),
            "+" => Some(Nargs::OneOrMore),
            other => other.parse::<usize>().ok().filter(|n| *n > 0).map(Nargs::Exactly),
        },
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .map(Nargs::Exactly),
        _ => None,
    }
}

/// The positional name, or the first long flag (falling back to the first short flag)
/// without dashes, with `-` replaced by `_`.
fn default_dest(names: &[String]) -> String {
    let chosen = names
        .iter()
        .find(|name| name.starts_with("--"))
        .unwrap_or(&names[0]);
    chosen.trim_start_matches('-').replace('-', "_")
}
