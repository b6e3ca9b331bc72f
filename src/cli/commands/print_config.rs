//! `p11-kit print-config` command - Show where modules and helpers come from

use clap::Parser;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::Path;

use crate::cli::args::{parse_command_args, GlobalOpts};
use crate::cli::error::{finish, CliError, ResourceError};
use crate::cli::external;
use crate::cli::printer::ListPrinter;
use crate::core::config::Config;
use crate::core::registry::Registry;

#[derive(Parser, Debug)]
#[command(name = "p11-kit print-config", about = "Print merged configuration", disable_version_flag = true)]
pub struct PrintConfigArgs {
    #[command(flatten)]
    pub global: GlobalOpts,
}

pub fn run(argv: &[OsString]) -> i32 {
    let args: PrintConfigArgs = match parse_command_args(argv) {
        Ok(args) => args,
        Err(code) => return code,
    };
    args.global.apply();

    let registry = Registry::from_config(&Config::load());
    let private_dir = external::private_dir();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    finish(print_config(&registry, &private_dir, &mut out))
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Print the effective directories, then every module config found
///
/// A module config that can't be read is reported after the rest has been
/// printed.
pub fn print_config<W: Write>(registry: &Registry, private_dir: &Path, out: &mut W) -> Result<(), CliError> {
    let mut printer = ListPrinter::new(out);

    printer.start_section("config", "p11-kit")?;
    printer.list("module-dirs", registry.dirs().iter().map(|dir| dir.display()))?;
    printer.field("private-dir", private_dir.display())?;
    printer.field("trust-tool", external::trust_tool_path().display())?;
    printer.end_section()?;

    let mut first_error = None;
    for entry in registry.discover() {
        let descriptor = match entry.descriptor {
            Ok(descriptor) => descriptor,
            Err(e) => {
                first_error.get_or_insert(e);
                continue;
            }
        };

        printer.start_section("module", &entry.name)?;
        printer.field("config", entry.path.display())?;
        printer.field("library-path", descriptor.module.as_deref().unwrap_or(""))?;
        printer.field("priority", descriptor.priority)?;
        printer.field("enabled", yes_no(descriptor.enabled))?;
        printer.end_section()?;
    }

    match first_error {
        Some(e) => Err(ResourceError::Registry(e).into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::RegistryError;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn render(registry: &Registry) -> (Result<(), CliError>, String) {
        console::set_colors_enabled(false);
        let mut out = Vec::new();
        let result = print_config(registry, Path::new("/opt/helpers"), &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_prints_dirs_and_modules() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("soft.module"), "module: /soft.so\npriority: 4\n").unwrap();
        fs::write(tmp.path().join("off.module"), "module: /off.so\nenabled: false\n").unwrap();

        let registry = Registry::new(vec![tmp.path().to_path_buf()]);
        let (result, output) = render(&registry);

        assert!(result.is_ok());
        assert!(output.starts_with("config: p11-kit\n    module-dirs:\n"));
        assert!(output.contains(&format!("           {}\n", tmp.path().display())));
        assert!(output.contains("    private-dir: /opt/helpers\n"));
        assert!(output.contains("    trust-tool: "));
        assert!(output.contains("module: soft\n"));
        assert!(output.contains("    library-path: /soft.so\n    priority: 4\n    enabled: yes\n"));
        assert!(output.contains("module: off\n"));
        assert!(output.contains("    enabled: no\n"));
    }

    #[test]
    fn test_unreadable_module_config_fails_after_listing() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("bad.module"), "module: [oops\n").unwrap();
        fs::write(tmp.path().join("good.module"), "module: /good.so\n").unwrap();

        let registry = Registry::new(vec![tmp.path().to_path_buf()]);
        let (result, output) = render(&registry);

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            CliError::Resource(ResourceError::Registry(RegistryError::Parse { .. }))
        ));
        assert_eq!(err.exit_code(), 1);
        assert!(output.contains("module: good\n"));
        assert!(!output.contains("module: bad\n"));
    }

    #[test]
    fn test_no_module_dirs_present() {
        let registry = Registry::new(vec![PathBuf::from("/nonexistent/modules")]);
        let (result, output) = render(&registry);
        assert!(result.is_ok());
        assert!(output.contains("           /nonexistent/modules\n"));
        assert!(!output.contains("module: "));
    }
}
