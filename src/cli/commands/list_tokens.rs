//! `p11-kit list-tokens` command - List tokens matching a URI

use clap::Parser;
use std::ffi::{OsStr, OsString};
use std::io::{self, Write};

use crate::cli::args::{parse_command_args, GlobalOpts};
use crate::cli::commands::list_modules::print_token_info;
use crate::cli::error::{finish, CliError, ResourceError};
use crate::cli::printer::ListPrinter;
use crate::core::config::Config;
use crate::core::iter::{IterBehavior, TokenIter};
use crate::core::module::{Module, ModuleBackend, ModuleSet};
use crate::core::registry::Registry;
use crate::core::uri::{format_token_uri, TokenFilter, UriError};

#[derive(Parser, Debug)]
#[command(name = "p11-kit list-tokens", about = "List tokens", disable_version_flag = true)]
pub struct ListTokensArgs {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Only print token URIs
    #[arg(long)]
    pub only_uris: bool,

    /// PKCS#11 URI selecting the tokens, e.g. 'pkcs11:' for all of them
    #[arg(value_name = "URI")]
    pub uri: OsString,
}

pub fn run(argv: &[OsString]) -> i32 {
    let args: ListTokensArgs = match parse_command_args(argv) {
        Ok(args) => args,
        Err(code) => return code,
    };
    args.global.apply();

    let registry = Registry::from_config(&Config::load());
    let stdout = io::stdout();
    let mut out = stdout.lock();
    finish(list_tokens(&registry, &args.uri, args.only_uris, &mut out))
}

/// Enumerate the tokens matching `uri` across the backend's modules
///
/// With `only_uris` each token is written as one URI line; a token whose
/// URI can't be rendered is left out without comment. Otherwise each token
/// gets a section named after its label.
pub fn list_tokens<B, W>(backend: &B, uri: &OsStr, only_uris: bool, out: &mut W) -> Result<(), CliError>
where
    B: ModuleBackend,
    W: Write,
{
    let filter = parse_filter(uri).map_err(ResourceError::FilterParse)?;
    let modules = ModuleSet::load(backend).map_err(ResourceError::ModuleLoad)?;
    print_matches(filter, modules.modules(), only_uris, out)
}

fn parse_filter(uri: &OsStr) -> Result<TokenFilter, UriError> {
    uri.to_str()
        .ok_or_else(|| UriError::BadEncoding(uri.to_string_lossy().into_owned()))?
        .parse()
}

// Takes the filter by value: the iterator is released first, then the
// filter, and the caller finalizes the modules last.
fn print_matches<M, W>(filter: TokenFilter, modules: &[M], only_uris: bool, out: &mut W) -> Result<(), CliError>
where
    M: Module,
    W: Write,
{
    let tokens = TokenIter::new(&filter, IterBehavior::TOKENS_ONLY, modules)
        .map_err(ResourceError::IteratorInit)?;

    let mut printer = ListPrinter::new(out);
    for token in tokens {
        let token = token.map_err(CliError::Enumeration)?;

        if only_uris {
            if let Ok(line) = format_token_uri(&token.info) {
                printer.line(line)?;
            }
        } else {
            printer.start_section("token", token.info.label())?;
            print_token_info(&mut printer, &token.info)?;
            printer.end_section()?;
        }
    }

    Ok(())
}
