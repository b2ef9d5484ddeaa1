mod cmd;
mod exit;
mod logging;
mod output;

use std::ffi::OsString;
use std::ops::Range;

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::Parser;

use crate::cmd::{Command, ProxyArgs};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "groundlink",
    version,
    about = "Ground-side diversity link proxy",
    long_about = "Runs the diversity proxy when no subcommand is given: frames received on every \
                  adapter are deduplicated and forwarded to TCP clients on port 1604, the \
                  telemetry log and the on-screen-display FIFO."
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(flatten)]
    proxy: ProxyArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

fn main() {
    let cli = match parse_lenient(std::env::args_os().collect()) {
        Ok(cli) => cli,
        Err(err) => err.exit(),
    };
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = match cli.command {
        Some(command) => cmd::run(command, format),
        None => cmd::proxy::run(cli.proxy),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

/// Parse arguments, skipping what cannot be understood instead of aborting.
///
/// Unknown flags are reported and dropped. A flag with a malformed value is
/// reported and dropped together with its value, so its default applies.
/// Help and version requests, and errors that cannot be attributed to a
/// single argument, are returned unchanged.
fn parse_lenient(mut args: Vec<OsString>) -> Result<Cli, clap::Error> {
    loop {
        let err = match Cli::try_parse_from(&args) {
            Ok(cli) => return Ok(cli),
            Err(err) => err,
        };
        let Some(span) = offending_span(&args, &err) else {
            return Err(err);
        };
        let _ = err.print();
        args.drain(span);
    }
}

fn offending_span(args: &[OsString], err: &clap::Error) -> Option<Range<usize>> {
    let invalid_arg = context_str(err, ContextKind::InvalidArg)?;
    match err.kind() {
        ErrorKind::UnknownArgument => {
            let index = position(args, |a| a == invalid_arg)
                .or_else(|| position(args, |a| a.starts_with(invalid_arg)))?;
            Some(index..index + 1)
        }
        ErrorKind::InvalidValue | ErrorKind::ValueValidation => {
            // "-c <ID>" names the flag; the first word is how it was spelled.
            let flag = invalid_arg.split_whitespace().next()?;
            let value = context_str(err, ContextKind::InvalidValue).unwrap_or("");
            if let Some(index) = position(args, |a| a == flag) {
                let takes_next = !value.is_empty()
                    && args.get(index + 1).and_then(|a| a.to_str()) == Some(value);
                return Some(index..index + if takes_next { 2 } else { 1 });
            }
            let index = position(args, |a| {
                a == format!("{flag}{value}") || a == format!("{flag}={value}")
            })?;
            Some(index..index + 1)
        }
        _ => None,
    }
}

fn context_str(err: &clap::Error, kind: ContextKind) -> Option<&str> {
    match err.get(kind)? {
        ContextValue::String(s) => Some(s.as_str()),
        _ => None,
    }
}

/// First argument after the program name matching `pred`.
fn position(args: &[OsString], pred: impl Fn(&str) -> bool) -> Option<usize> {
    args.iter()
        .enumerate()
        .skip(1)
        .find(|(_, a)| a.to_str().is_some_and(&pred))
        .map(|(i, _)| i)
}
