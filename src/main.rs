use miette::Result;
use p11kit::cli::{dispatch, message};
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    // Reset SIGPIPE to default behavior (terminate silently) for proper Unix piping.
    // Without this, piping to `head`, `grep -q`, etc. causes a panic on broken pipe.
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;
    message::init_logging();

    let code = dispatch::dispatch(std::env::args_os());
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
