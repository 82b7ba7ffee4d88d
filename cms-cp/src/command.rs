//! Parsing of interactive commands.
//!
//! One command per line. Command names are case-insensitive; arguments are
//! separated by whitespace and the value of `SetValues` takes the rest of the
//! line.

use std::fmt;

use thiserror::Error;

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Refresh,
    /// List every device, or describe one
    List(Option<usize>),
    GetVar { device: usize, variable: String },
    SetAlarmsEnabled { device: usize, enabled: bool },
    GetValues { device: usize, path: String },
    SetValues { device: usize, path: String, value: String },
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Help,
    Refresh,
    List,
    GetVar,
    SetAlarmsEnabled,
    GetValues,
    SetValues,
    Exit,
}

const VERBS: [Verb; 8] = [
    Verb::Help,
    Verb::Refresh,
    Verb::List,
    Verb::GetVar,
    Verb::SetAlarmsEnabled,
    Verb::GetValues,
    Verb::SetValues,
    Verb::Exit,
];

impl Verb {
    fn name(self) -> &'static str {
        match self {
            Verb::Help => "Help",
            Verb::Refresh => "Refresh",
            Verb::List => "List",
            Verb::GetVar => "GetVar",
            Verb::SetAlarmsEnabled => "SetAlarmsEnabled",
            Verb::GetValues => "GetValues",
            Verb::SetValues => "SetValues",
            Verb::Exit => "Exit",
        }
    }

    fn arguments(self) -> &'static str {
        match self {
            Verb::List => "[devnum]",
            Verb::GetVar => "<devnum> <varname>",
            Verb::SetAlarmsEnabled => "<devnum> <0|1>",
            Verb::GetValues => "<devnum> <path>",
            Verb::SetValues => "<devnum> <path> <value>",
            Verb::Help | Verb::Refresh | Verb::Exit => "",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Verb::Help => "Print this list of commands",
            Verb::Refresh => "Forget all devices and search again",
            Verb::List => "List devices, or describe one device",
            Verb::GetVar => "Query a state variable",
            Verb::SetAlarmsEnabled => "Turn alarm eventing off or on",
            Verb::GetValues => "Read the parameters under a path",
            Verb::SetValues => "Write one parameter",
            Verb::Exit => "Stop the control point and quit",
        }
    }

    fn lookup(word: &str) -> Option<Self> {
        VERBS
            .into_iter()
            .find(|verb| verb.name().eq_ignore_ascii_case(word))
    }

    fn usage(self) -> String {
        format!("{} {}", self.name(), self.arguments()).trim_end().to_string()
    }
}

/// Why a line could not be turned into a [`Command`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command {0:?}; type Help for the list of commands")]
    Unknown(String),

    /// Wrong arguments for a known command; carries the usage line
    #[error("{message}\n  Usage: {usage}")]
    Usage { message: String, usage: String },
}

impl CommandError {
    fn usage(verb: Verb, message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            usage: verb.usage(),
        }
    }
}

/// Parse one input line; blank lines yield `None`
pub fn parse(line: &str) -> Option<Result<Command, CommandError>> {
    let mut words = line.split_whitespace();
    let word = words.next()?;
    let Some(verb) = Verb::lookup(word) else {
        return Some(Err(CommandError::Unknown(word.to_string())));
    };
    let args: Vec<&str> = words.collect();
    Some(parse_args(verb, &args))
}

fn parse_args(verb: Verb, args: &[&str]) -> Result<Command, CommandError> {
    match verb {
        Verb::Help => no_args(verb, args, Command::Help),
        Verb::Refresh => no_args(verb, args, Command::Refresh),
        Verb::Exit => no_args(verb, args, Command::Exit),

        Verb::List => match args {
            [] => Ok(Command::List(None)),
            [device] => Ok(Command::List(Some(device_number(verb, device)?))),
            _ => Err(CommandError::usage(verb, "Too many arguments")),
        },

        Verb::GetVar => match args {
            [device, variable] => Ok(Command::GetVar {
                device: device_number(verb, device)?,
                variable: variable.to_string(),
            }),
            _ => Err(wrong_count(verb, 2, args.len())),
        },

        Verb::SetAlarmsEnabled => match args {
            [device, flag] => {
                let device = device_number(verb, device)?;
                let enabled = match *flag {
                    "0" => false,
                    "1" => true,
                    other => {
                        return Err(CommandError::usage(verb, format!("Expected 0 or 1, got {other:?}")))
                    }
                };
                Ok(Command::SetAlarmsEnabled { device, enabled })
            }
            _ => Err(wrong_count(verb, 2, args.len())),
        },

        Verb::GetValues => match args {
            [device, path] => Ok(Command::GetValues {
                device: device_number(verb, device)?,
                path: path.to_string(),
            }),
            _ => Err(wrong_count(verb, 2, args.len())),
        },

        Verb::SetValues => match args {
            [device, path, value @ ..] if !value.is_empty() => Ok(Command::SetValues {
                device: device_number(verb, device)?,
                path: path.to_string(),
                value: value.join(" "),
            }),
            _ => Err(wrong_count(verb, 3, args.len())),
        },
    }
}

fn no_args(verb: Verb, args: &[&str], command: Command) -> Result<Command, CommandError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(CommandError::usage(verb, "Takes no arguments"))
    }
}

fn wrong_count(verb: Verb, expected: usize, got: usize) -> CommandError {
    CommandError::usage(verb, format!("Expected {expected} arguments, got {got}"))
}

fn device_number(verb: Verb, word: &str) -> Result<usize, CommandError> {
    word.parse::<usize>()
        .map_err(|_| CommandError::usage(verb, format!("Device number must be numeric, got {word:?}")))
}

/// The command list printed by `Help`
pub struct HelpText;

impl fmt::Display for HelpText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Valid commands:")?;
        for verb in VERBS {
            writeln!(f, "  {:<40} {}", verb.usage(), verb.description())?;
        }
        Ok(())
    }
}
