//! Command table and dispatch
//!
//! Global flags are parsed up to the first non-flag argument, which names
//! the command. A name found in the table runs its handler; anything else
//! goes to the fallback entry, which delegates to a helper executable.

use clap::{CommandFactory, FromArgMatches};
use std::ffi::{OsStr, OsString};
use std::fmt::Write as _;

use crate::cli::args::Cli;
use crate::cli::commands::{list_modules, list_tokens, print_config};
use crate::cli::error::EXIT_USAGE;
use crate::cli::external;

/// A command handler; `argv[0]` is the command name
pub type Handler = fn(&[OsString]) -> i32;

/// How an entry is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    /// Exact command name
    Named(&'static str),
    /// Catches every name not in the table
    Fallback,
}

pub struct CommandEntry {
    pub name: CommandName,
    pub handler: Handler,
    pub description: Option<&'static str>,
}

/// Registered commands, in help order
pub static COMMANDS: &[CommandEntry] = &[
    CommandEntry {
        name: CommandName::Named("list-modules"),
        handler: list_modules::run,
        description: Some("List modules and tokens"),
    },
    CommandEntry {
        name: CommandName::Named("list-tokens"),
        handler: list_tokens::run,
        description: Some("List tokens"),
    },
    CommandEntry {
        name: CommandName::Named("print-config"),
        handler: print_config::run,
        description: Some("Print merged configuration"),
    },
    CommandEntry {
        name: CommandName::Named("remote"),
        handler: external::run,
        description: Some("Run a specific PKCS#11 module remotely"),
    },
    CommandEntry {
        name: CommandName::Named("server"),
        handler: external::run,
        description: Some("Run a server process that exposes PKCS#11 module remotely"),
    },
    CommandEntry {
        name: CommandName::Fallback,
        handler: external::run,
        description: None,
    },
];

/// Find the entry for a command name, falling back if there is one
pub fn lookup<'a>(table: &'a [CommandEntry], name: &OsStr) -> Option<&'a CommandEntry> {
    table
        .iter()
        .find(|entry| matches!(entry.name, CommandName::Named(n) if OsStr::new(n) == name))
        .or_else(|| table.iter().find(|entry| entry.name == CommandName::Fallback))
}

/// Help text listing the described commands
pub fn command_list(table: &[CommandEntry]) -> String {
    let described: Vec<(&str, &str)> = table
        .iter()
        .filter_map(|entry| match (entry.name, entry.description) {
            (CommandName::Named(name), Some(description)) => Some((name, description)),
            _ => None,
        })
        .collect();
    let width = described.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

    let mut text = String::from("Commands:\n");
    for (name, description) in described {
        let _ = writeln!(text, "  {:<width$}  {}", name, description, width = width);
    }
    text.push_str("\nOther commands are run from the helper directory ($P11_KIT_PRIVATEDIR).");
    text
}

/// Run the process: parse global flags and dispatch the command
pub fn dispatch<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    dispatch_with(COMMANDS, args)
}

/// [`dispatch`] against a specific command table
pub fn dispatch_with<I, T>(table: &[CommandEntry], args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut command = Cli::command().after_help(command_list(table));

    let cli = match command
        .try_get_matches_from_mut(args)
        .and_then(|matches| Cli::from_arg_matches(&matches))
    {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return e.exit_code();
        }
    };

    cli.global.apply();

    let Some(name) = cli.command.first() else {
        let _ = command.print_help();
        return EXIT_USAGE;
    };

    match lookup(table, name) {
        Some(entry) => {
            tracing::debug!(command = %name.to_string_lossy(), "dispatching");
            (entry.handler)(&cli.command)
        }
        None => {
            let _ = command.print_help();
            EXIT_USAGE
        }
    }
}
