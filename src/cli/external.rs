//! Delegation of unknown commands to helper executables
//!
//! `p11-kit foo args...` runs `$P11_KIT_PRIVATEDIR/p11-kit-foo args...`,
//! falling back to the built-in private directory when the variable is unset
//! or empty. The legacy `extract` and `extract-trust` commands go to the
//! `trust` tool instead. On success the current process image is replaced,
//! so nothing after [`exec`] runs.

use miette::Diagnostic;
use std::convert::Infallible;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::cli::error::{CliError, EXIT_USAGE};
use crate::cli::message;

/// Prefix of helper executable names
pub const HELPER_PREFIX: &str = "p11-kit-";

/// Environment variable overriding the helper directory
pub const PRIVATE_DIR_ENV: &str = "P11_KIT_PRIVATEDIR";

/// Helper directory chosen at build time
pub const DEFAULT_PRIVATE_DIR: &str = match option_env!("P11_KIT_PRIVATEDIR") {
    Some(dir) => dir,
    None => "/usr/libexec/p11-kit",
};

/// Directory holding the `trust` tool, chosen at build time
pub const DEFAULT_BIN_DIR: &str = match option_env!("P11_KIT_BINDIR") {
    Some(dir) => dir,
    None => "/usr/bin",
};

/// The command name can't be turned into a helper path
#[derive(Debug, Error, Diagnostic)]
#[error("'{command}' is not a valid command name. See 'p11-kit --help'")]
#[diagnostic(code(p11kit::delegate::name))]
pub struct ResolutionError {
    pub command: String,
}

/// The helper could not be started
#[derive(Debug, Error, Diagnostic)]
pub enum DelegationError {
    #[error("'{command}' is not a valid command. See 'p11-kit --help'")]
    #[diagnostic(code(p11kit::delegate::exec))]
    Helper {
        command: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't run trust tool")]
    #[diagnostic(code(p11kit::delegate::trust))]
    Trust {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Helper,
    Trust,
}

/// Where a delegated command goes and the arguments it receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationTarget {
    pub kind: TargetKind,
    pub executable_path: PathBuf,
    /// Full argument vector, `argv[0]` included
    pub argv: Vec<OsString>,
}

/// Pick the helper directory: a non-empty override wins over the default
pub fn resolve_directory(override_value: Option<&OsStr>, default: &Path) -> PathBuf {
    match override_value {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => default.to_path_buf(),
    }
}

/// Read an environment variable unless running with elevated privileges
fn secure_var_os(key: &str) -> Option<OsString> {
    #[cfg(unix)]
    {
        // SAFETY: these calls only read process credentials
        let elevated = unsafe { libc::getuid() != libc::geteuid() || libc::getgid() != libc::getegid() };
        if elevated {
            return None;
        }
    }
    std::env::var_os(key)
}

/// Helper directory in effect for this process
pub fn private_dir() -> PathBuf {
    let override_dir = secure_var_os(PRIVATE_DIR_ENV);
    resolve_directory(override_dir.as_deref(), Path::new(DEFAULT_PRIVATE_DIR))
}

/// Where the `trust` tool is expected
pub fn trust_tool_path() -> PathBuf {
    Path::new(DEFAULT_BIN_DIR).join(format!("trust{}", std::env::consts::EXE_SUFFIX))
}

fn trust_target(argv: Vec<OsString>) -> DelegationTarget {
    let path = trust_tool_path();
    let mut args = Vec::with_capacity(argv.len() + 1);
    args.push(path.clone().into_os_string());
    args.extend(argv);

    DelegationTarget {
        kind: TargetKind::Trust,
        executable_path: path,
        argv: args,
    }
}

/// Work out what to run for `argv` (`argv[0]` is the command name)
pub fn resolve_target(
    argv: &[OsString],
    private_dir_override: Option<&OsStr>,
) -> Result<DelegationTarget, ResolutionError> {
    let Some(name) = argv.first() else {
        return Err(ResolutionError {
            command: String::new(),
        });
    };

    if name == "extract" {
        return Ok(trust_target(argv.to_vec()));
    }
    if name == "extract-trust" {
        let mut argv = argv.to_vec();
        argv[0] = OsString::from("extract-compat");
        return Ok(trust_target(argv));
    }

    let name_str = name.to_string_lossy();
    if name_str.is_empty() || name_str.contains(['/', '\\']) || name_str.starts_with('-') {
        return Err(ResolutionError {
            command: name_str.into_owned(),
        });
    }

    let mut filename = OsString::from(HELPER_PREFIX);
    filename.push(name);
    filename.push(std::env::consts::EXE_SUFFIX);

    let dir = resolve_directory(private_dir_override, Path::new(DEFAULT_PRIVATE_DIR));
    let path = dir.join(filename);

    #[allow(unused_mut)]
    let mut argv = argv.to_vec();
    // Windows wants argv[0] to be the executable itself
    #[cfg(windows)]
    {
        argv[0] = path.clone().into_os_string();
    }

    Ok(DelegationTarget {
        kind: TargetKind::Helper,
        executable_path: path,
        argv,
    })
}

/// Replace the current process with the target
///
/// Only returns on failure.
pub fn exec(target: &DelegationTarget) -> Result<Infallible, DelegationError> {
    tracing::debug!(path = %target.executable_path.display(), "delegating");

    let mut command = Command::new(&target.executable_path);
    command.args(target.argv.iter().skip(1));

    let source = replace_process(&mut command, target);

    Err(match target.kind {
        TargetKind::Helper => DelegationError::Helper {
            command: target
                .argv
                .first()
                .map(|a| a.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: target.executable_path.clone(),
            source,
        },
        TargetKind::Trust => DelegationError::Trust {
            path: target.executable_path.clone(),
            source,
        },
    })
}

#[cfg(unix)]
fn replace_process(command: &mut Command, target: &DelegationTarget) -> std::io::Error {
    use std::os::unix::process::CommandExt;

    if let Some(arg0) = target.argv.first() {
        command.arg0(arg0);
    }
    command.exec()
}

#[cfg(not(unix))]
fn replace_process(command: &mut Command, _target: &DelegationTarget) -> std::io::Error {
    // No exec here: run the helper to completion and exit with its status
    match command.status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(e) => e,
    }
}

/// Resolve and run a delegated command
pub fn delegate(argv: &[OsString]) -> Result<Infallible, CliError> {
    let override_dir = secure_var_os(PRIVATE_DIR_ENV);
    let target = resolve_target(argv, override_dir.as_deref())?;
    Ok(exec(&target)?)
}

/// Command handler for every name without an in-process implementation
pub fn run(argv: &[OsString]) -> i32 {
    match delegate(argv) {
        Ok(never) => match never {},
        Err(err) => {
            message::report(err);
            EXIT_USAGE
        }
    }
}
