//! User-facing diagnostics and the process-wide quiet/verbose switch
//!
//! Errors are reported once, where they are detected, through [`report`].
//! Quiet mode silences them; verbose mode also turns on debug tracing.

use miette::Diagnostic;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

/// Environment variable holding a tracing filter, overriding the flags
pub const DEBUG_ENV: &str = "P11_KIT_DEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Verbosity::Quiet,
            2 => Verbosity::Verbose,
            _ => Verbosity::Normal,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Verbosity::Quiet => 0,
            Verbosity::Normal => 1,
            Verbosity::Verbose => 2,
        }
    }

    fn default_filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "debug",
        }
    }
}

static VERBOSITY: AtomicU8 = AtomicU8::new(1);
static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn filter_for(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_env(DEBUG_ENV).unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()))
}

/// Install the stderr tracing subscriber
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    let (filter, handle) = reload::Layer::new(filter_for(verbosity()));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER.set(handle);
    }
}

pub fn verbosity() -> Verbosity {
    Verbosity::from_u8(VERBOSITY.load(Ordering::Relaxed))
}

/// Switch the process-wide mode, retuning the tracing filter to match
pub fn set_verbosity(verbosity: Verbosity) {
    VERBOSITY.store(verbosity.as_u8(), Ordering::Relaxed);
    if let Some(handle) = FILTER.get() {
        let _ = handle.reload(filter_for(verbosity));
    }
}

/// Report a diagnostic on stderr unless quiet
pub fn report<E>(err: E)
where
    E: Diagnostic + Send + Sync + 'static,
{
    if verbosity() == Verbosity::Quiet {
        return;
    }
    eprintln!("{:?}", miette::Report::new(err));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_round_trips_through_storage() {
        for v in [Verbosity::Quiet, Verbosity::Normal, Verbosity::Verbose] {
            assert_eq!(Verbosity::from_u8(v.as_u8()), v);
        }
    }

    #[test]
    fn test_default_filters() {
        assert_eq!(Verbosity::Quiet.default_filter(), "error");
        assert_eq!(Verbosity::Verbose.default_filter(), "debug");
    }
}
