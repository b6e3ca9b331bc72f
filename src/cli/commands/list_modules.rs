//! `p11-kit list-modules` command - List modules and their tokens

use clap::Parser;
use std::ffi::OsString;
use std::io::{self, Write};

use crate::cli::args::{parse_command_args, GlobalOpts};
use crate::cli::error::{finish, CliError, ResourceError};
use crate::cli::printer::ListPrinter;
use crate::core::config::Config;
use crate::core::iter::IterError;
use crate::core::module::{Module, ModuleBackend, ModuleSet};
use crate::core::pkcs11::{Rv, TokenInfo};
use crate::core::registry::Registry;

#[derive(Parser, Debug)]
#[command(name = "p11-kit list-modules", about = "List modules and tokens", disable_version_flag = true)]
pub struct ListModulesArgs {
    #[command(flatten)]
    pub global: GlobalOpts,
}

pub fn run(argv: &[OsString]) -> i32 {
    let args: ListModulesArgs = match parse_command_args(argv) {
        Ok(args) => args,
        Err(code) => return code,
    };
    args.global.apply();

    let registry = Registry::from_config(&Config::load());
    let stdout = io::stdout();
    let mut out = stdout.lock();
    finish(list_modules(&registry, &mut out))
}

/// Write the fields of a token section
pub fn print_token_info<W: Write>(printer: &mut ListPrinter<W>, info: &TokenInfo) -> io::Result<()> {
    printer.field("manufacturer", info.manufacturer())?;
    printer.field("model", info.model())?;
    printer.field("serial-number", info.serial())?;
    printer.field("hardware-version", info.hardware_version)?;
    printer.field("firmware-version", info.firmware_version)?;

    let flags: Vec<&str> = info.flags.names().collect();
    if !flags.is_empty() {
        printer.list("flags", flags)?;
    }
    Ok(())
}

/// Print every loaded module with all of its tokens
pub fn list_modules<B, W>(backend: &B, out: &mut W) -> Result<(), CliError>
where
    B: ModuleBackend,
    W: Write,
{
    let modules = ModuleSet::load(backend).map_err(ResourceError::ModuleLoad)?;
    let mut printer = ListPrinter::new(out);

    for module in modules.modules() {
        let failed = |rv: Rv| {
            CliError::Enumeration(IterError::Module {
                module: module.name().to_string(),
                rv,
            })
        };

        printer.start_section("module", module.name())?;
        if let Some(path) = module.library_path() {
            printer.field("library-path", path)?;
        }

        for slot in module.slots().map_err(failed)? {
            let info = match module.token_info(slot) {
                Ok(info) => info,
                Err(Rv::TOKEN_NOT_PRESENT) => continue,
                Err(rv) => return Err(failed(rv)),
            };

            printer.start_section("token", info.label())?;
            print_token_info(&mut printer, &info)?;
            printer.end_section()?;
        }
        printer.end_section()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::module::testing::{MockBackend, MockModule};
    use crate::core::module::LoadError;
    use crate::core::pkcs11::TokenFlags;

    fn run_list(backend: &MockBackend) -> (Result<(), CliError>, String) {
        console::set_colors_enabled(false);
        let mut out = Vec::new();
        let result = list_modules(backend, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_modules_with_nested_tokens() {
        let mut flags = TokenFlags::RNG;
        flags.insert(TokenFlags::LOGIN_REQUIRED);
        let token = TokenInfo::new("Test Token", "Example Corp", "SoftToken", "0001").with_flags(flags);
        let backend = MockBackend::new(vec![
            MockModule::new("soft").token(token),
            MockModule::new("empty"),
        ]);
        let (result, output) = run_list(&backend);

        assert!(result.is_ok());
        assert!(output.starts_with("module: soft\n    token: Test Token\n        manufacturer: Example Corp\n"));
        assert!(output.contains("        model: SoftToken\n"));
        assert!(output.contains("        flags:\n               rng\n               login-required\n"));
        assert!(output.contains("\nmodule: empty\n"));
        assert!(backend.balanced());
    }

    #[test]
    fn test_absent_tokens_are_skipped() {
        let backend = MockBackend::new(vec![MockModule::new("soft")
            .broken_slot(Rv::TOKEN_NOT_PRESENT)
            .token(TokenInfo::new("Present", "", "", ""))]);
        let (result, output) = run_list(&backend);

        assert!(result.is_ok());
        assert_eq!(output.matches("token: ").count(), 1);
        assert!(output.contains("token: Present\n"));
    }

    #[test]
    fn test_slot_failure_is_enumeration_error() {
        let backend = MockBackend::new(vec![MockModule::new("bad").slots_fail(Rv::DEVICE_REMOVED)]);
        let (result, _) = run_list(&backend);

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            CliError::Enumeration(IterError::Module { ref module, rv }) if module == "bad" && rv == Rv::DEVICE_REMOVED
        ));
        assert_eq!(err.exit_code(), 1);
        assert!(backend.balanced());
    }

    #[test]
    fn test_no_modules_is_resource_error() {
        let backend = MockBackend::new(Vec::new());
        let (result, output) = run_list(&backend);

        assert!(matches!(
            result.unwrap_err(),
            CliError::Resource(ResourceError::ModuleLoad(LoadError::NoModules))
        ));
        assert!(output.is_empty());
        assert!(backend.balanced());
    }

    #[test]
    fn test_args_reject_positionals() {
        let argv: Vec<OsString> = vec!["list-modules".into(), "extra".into()];
        assert!(ListModulesArgs::try_parse_from(&argv).is_err());

        let argv: Vec<OsString> = vec!["list-modules".into(), "-q".into()];
        assert!(ListModulesArgs::try_parse_from(&argv).unwrap().global.quiet);
    }
}
