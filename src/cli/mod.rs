//! CLI module - argument parsing and command dispatch

pub mod args;
pub mod commands;
pub mod dispatch;
pub mod error;
pub mod external;
pub mod message;
pub mod printer;

pub use args::{Cli, GlobalOpts};
pub use dispatch::{dispatch, CommandEntry, CommandName, COMMANDS};
pub use error::CliError;
