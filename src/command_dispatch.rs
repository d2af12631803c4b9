//! Purpose: Hold top-level CLI command dispatch for `phal`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Success output goes to stdout; errors return to `main` for reporting.
//! Invariants: `check` validates offline against the same board model `serve` uses.

use super::*;

use phal::api::{BoardSpec, Level, RemoteClient, SimulatedBoard, parse_and_validate};

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "phal", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Serve {
            bind,
            allow_non_loopback,
            board,
            config,
            max_body_bytes,
        } => {
            let config = serve::ServeConfig {
                bind: parse_bind(&bind)?,
                allow_non_loopback,
                board: load_board(board.as_deref())?,
                initial_config: config.as_deref().map(read_input).transpose()?,
                max_body_bytes,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Check { config, board } => {
            let spec = load_board(board.as_deref())?;
            let board = SimulatedBoard::new(&spec)?;
            let payload = read_input(&config)?;
            let config = parse_and_validate(&payload, &board)?;
            emit_json(json!({ "ok": true, "limbs": config }));
            Ok(RunOutcome::ok())
        }
        Command::Apply { config, url } => {
            let client = RemoteClient::new(url)?;
            let payload = read_input(&config)?;
            let generation = client.apply_config(payload)?;
            emit_json(json!({ "generation": generation }));
            Ok(RunOutcome::ok())
        }
        Command::Get { name, url } => {
            let client = RemoteClient::new(url)?;
            let body = client.get_limb(&name)?;
            emit_bytes(&body)?;
            // Pin levels have no trailing newline on the wire.
            if io::stdout().is_terminal() && is_level(&body) {
                println!();
            }
            Ok(RunOutcome::ok())
        }
        Command::Set { name, value, url } => {
            let client = RemoteClient::new(url)?;
            let body = match value {
                Some(value) => value.into_bytes(),
                None => read_input(Path::new("-"))?,
            };
            client.set_limb(&name, &body)?;
            Ok(RunOutcome::ok())
        }
    }
}

fn load_board(path: Option<&Path>) -> Result<BoardSpec, Error> {
    match path {
        Some(path) => BoardSpec::load(path),
        None => Ok(BoardSpec::default()),
    }
}

fn is_level(body: &[u8]) -> bool {
    std::str::from_utf8(body).is_ok_and(|text| text.parse::<Level>().is_ok())
}
