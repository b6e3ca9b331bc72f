//! Command failures and their exit codes

use miette::Diagnostic;
use thiserror::Error;

use crate::cli::external::{DelegationError, ResolutionError};
use crate::cli::message;
use crate::core::iter::IterError;
use crate::core::module::LoadError;
use crate::core::registry::RegistryError;
use crate::core::uri::UriError;

/// Exit code for runtime failures
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for usage, resolution and delegation failures
pub const EXIT_USAGE: i32 = 2;

/// A resource a command needed could not be set up
#[derive(Debug, Error, Diagnostic)]
pub enum ResourceError {
    #[error("failed to parse URI")]
    #[diagnostic(code(p11kit::resource::uri))]
    FilterParse(#[source] UriError),

    #[error("failed to load and initialize modules")]
    #[diagnostic(code(p11kit::resource::modules))]
    ModuleLoad(#[source] LoadError),

    #[error("failed to initialize iterator")]
    #[diagnostic(code(p11kit::resource::iterator))]
    IteratorInit(#[source] IterError),

    #[error("failed to read module configuration")]
    #[diagnostic(code(p11kit::resource::registry))]
    Registry(#[source] RegistryError),
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("{0}")]
    #[diagnostic(code(p11kit::usage))]
    Usage(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resource(#[from] ResourceError),

    #[error("failed to enumerate tokens")]
    #[diagnostic(code(p11kit::enumeration))]
    Enumeration(#[source] IterError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Delegation(#[from] DelegationError),

    #[error("couldn't write output")]
    #[diagnostic(code(p11kit::output))]
    Output(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) | CliError::Resolution(_) | CliError::Delegation(_) => EXIT_USAGE,
            CliError::Resource(_) | CliError::Enumeration(_) | CliError::Output(_) => EXIT_FAILURE,
        }
    }
}

/// Turn a command result into its exit code, reporting any failure
pub fn finish(result: Result<(), CliError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            let code = err.exit_code();
            message::report(err);
            code
        }
    }
}
