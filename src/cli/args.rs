//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser};
use clap::{CommandFactory, FromArgMatches};
use std::ffi::OsString;

use crate::cli::message::{self, Verbosity};

/// Top-level parser: global flags, then the command and its arguments
///
/// Everything from the first non-flag argument on is captured untouched and
/// handed to the command table.
#[derive(Parser, Debug)]
#[command(name = "p11-kit")]
#[command(version, about = "Tool for operating on configured PKCS#11 modules")]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Command to run, followed by its arguments
    #[arg(value_name = "COMMAND", trailing_var_arg = true)]
    pub command: Vec<OsString>,
}

/// Flags accepted both globally and by each in-process command
#[derive(clap::Args, Clone, Debug, Default)]
pub struct GlobalOpts {
    /// Show verbose debug output
    #[arg(long, short = 'v', action = ArgAction::SetTrue, overrides_with = "quiet")]
    pub verbose: bool,

    /// Suppress command output
    #[arg(long, short = 'q', action = ArgAction::SetTrue, overrides_with = "verbose")]
    pub quiet: bool,
}

impl GlobalOpts {
    /// The mode these flags ask for, if any
    pub fn verbosity(&self) -> Option<Verbosity> {
        if self.verbose {
            Some(Verbosity::Verbose)
        } else if self.quiet {
            Some(Verbosity::Quiet)
        } else {
            None
        }
    }

    /// Switch the process-wide mode when a flag was given
    pub fn apply(&self) {
        if let Some(verbosity) = self.verbosity() {
            message::set_verbosity(verbosity);
        }
    }
}

/// Parse a command's own arguments (`argv[0]` is the command name)
///
/// On `--help` or a usage error clap's output is printed and the exit code
/// to return is handed back: 0 for help, 2 for errors.
pub fn parse_command_args<T: Parser>(argv: &[OsString]) -> Result<T, i32> {
    try_parse_command(argv).map_err(|e| {
        let _ = e.print();
        e.exit_code()
    })
}

/// Parse a command's arguments, with usage shown as `p11-kit <command>`
pub fn try_parse_command<T: Parser>(argv: &[OsString]) -> Result<T, clap::Error> {
    let name = argv.first().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let mut command = T::command().bin_name(format!("p11-kit {}", name));
    let mut matches = command.try_get_matches_from_mut(argv)?;
    T::from_arg_matches_mut(&mut matches).map_err(|e| e.format(&mut command))
}
