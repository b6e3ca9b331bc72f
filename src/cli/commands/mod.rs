//! In-process command implementations

pub mod list_modules;
pub mod list_tokens;
pub mod print_config;
