//! Purpose: `phal` CLI entry point.
//! Role: Binary crate root; parses args, runs the server or a client command, reports errors.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Limb and config traffic goes through `api::Dispatcher` or `api::RemoteClient`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::error::ErrorKind as ClapErrorKind;
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};

mod command_dispatch;
mod serve;

use phal::api::{Error, ErrorKind, to_exit_code};

const DEFAULT_URL: &str = "http://127.0.0.1:8000";

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

#[derive(Parser)]
#[command(
    name = "phal",
    version,
    about = "Named GPIO pins and serial channels over HTTP",
    long_about = r#"Serve hardware limbs (named pins and serial channels) over HTTP.

A limb configuration is a JSON list of declarations binding names to
physical resources on the board. Apply it at startup with --config or at
runtime with `phal apply`; the previous configuration stays live if the
new one is rejected."#,
    after_help = r#"EXAMPLES
  $ phal serve --config limbs.json
  $ phal check limbs.json
  $ phal set led High
  $ phal get button
  $ echo hello | phal set console
  $ phal get console

LEARN MORE
  $ phal <command> --help"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Run the HTTP server",
        long_about = r#"Run the HTTP server on a simulated board.

Endpoints:
  GET  /config         active configuration and generation
  POST /config         apply a limb configuration
  GET  /limb/{name}    read a pin (High|Low) or drain a serial limb
  POST /limb/{name}    write a pin (High|Low) or send bytes to a serial limb"#,
        after_help = r#"EXAMPLES
  $ phal serve
  $ phal serve --bind 127.0.0.1:9000 --board board.json --config limbs.json

NOTES
  - Loopback-only unless --allow-non-loopback is given
  - Set RUST_LOG=debug to log every limb operation"#
    )]
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000", help = "Address to listen on")]
        bind: String,
        #[arg(long, help = "Allow binding to a non-loopback address")]
        allow_non_loopback: bool,
        #[arg(
            long,
            help = "Board description (JSON); defaults to gpio0-27 and uart0-3",
            value_hint = ValueHint::FilePath
        )]
        board: Option<PathBuf>,
        #[arg(
            long,
            help = "Limb configuration applied before listening",
            value_hint = ValueHint::FilePath
        )]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 1024 * 1024, help = "Request body limit in bytes")]
        max_body_bytes: u64,
    },
    #[command(
        about = "Validate a limb configuration without a server",
        after_help = r#"EXAMPLES
  $ phal check limbs.json
  $ phal check --board board.json limbs.json
  $ cat limbs.json | phal check -"#
    )]
    Check {
        #[arg(help = "Configuration file, or - for stdin", value_hint = ValueHint::FilePath)]
        config: PathBuf,
        #[arg(long, help = "Board description (JSON)", value_hint = ValueHint::FilePath)]
        board: Option<PathBuf>,
    },
    #[command(about = "Apply a limb configuration to a running server")]
    Apply {
        #[arg(help = "Configuration file, or - for stdin", value_hint = ValueHint::FilePath)]
        config: PathBuf,
        #[arg(long, default_value = DEFAULT_URL, help = "Server base URL", value_hint = ValueHint::Url)]
        url: String,
    },
    #[command(
        about = "Read a limb",
        long_about = "Read a pin level (High|Low) or drain the bytes a serial limb has received."
    )]
    Get {
        #[arg(help = "Limb name")]
        name: String,
        #[arg(long, default_value = DEFAULT_URL, help = "Server base URL", value_hint = ValueHint::Url)]
        url: String,
    },
    #[command(
        about = "Write a limb",
        long_about = "Write a pin level (High|Low) or send bytes to a serial limb. Reads stdin when VALUE is omitted."
    )]
    Set {
        #[arg(help = "Limb name")]
        name: String,
        #[arg(help = "High|Low for pins, text for serial limbs")]
        value: Option<String>,
        #[arg(long, default_value = DEFAULT_URL, help = "Server base URL", value_hint = ValueHint::Url)]
        url: String,
    },
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `phal --help`."));
            }
        },
    };

    command_dispatch::dispatch_command(cli.command).map_err(add_transport_hint)
}

fn parse_bind(bind: &str) -> Result<SocketAddr, Error> {
    bind.parse().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid bind address")
            .with_hint("Use a host:port value like 127.0.0.1:8000.")
    })
}

/// Reads a file argument; `-` means stdin.
fn read_input(path: &Path) -> Result<Vec<u8>, Error> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read stdin")
                .with_source(err)
        })?;
        return Ok(buf);
    }
    std::fs::read(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to read {}", path.display()))
            .with_source(err)
    })
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_bytes(bytes: &[u8]) -> Result<(), Error> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(bytes)
        .and_then(|_| stdout.flush())
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write stdout")
                .with_source(err)
        })
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::Malformed => "malformed configuration",
        ErrorKind::DuplicateName => "duplicate limb name",
        ErrorKind::InvalidDirection => "invalid direction",
        ErrorKind::UnknownResource => "unknown resource",
        ErrorKind::ResourceConflict => "resource bound twice",
        ErrorKind::NotFound => "not found",
        ErrorKind::Direction => "operation not allowed for this direction",
        ErrorKind::Hardware => "hardware error",
        ErrorKind::Io => "i/o error",
    }
    .to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(err.kind().as_str()));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(limb) = err.limb() {
        inner.insert("limb".to_string(), json!(limb));
    }
    if let Some(resource) = err.resource() {
        inner.insert("resource".to_string(), json!(resource));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(limb) = err.limb() {
        lines.push(format!("limb: {limb}"));
    }
    if let Some(resource) = err.resource() {
        lines.push(format!("resource: {resource}"));
    }
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn add_transport_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() {
        return err;
    }
    if err.message() == Some("request failed") {
        return err.with_hint("Is `phal serve` running? Pass --url to reach another server.");
    }
    err
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
