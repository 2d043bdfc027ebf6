use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use ed64_core::{
    DeviceSession, LoaderEvent, LoaderObserver, SessionConfig, SessionError, SessionState,
    TracingObserver, TransferPlan,
};
use tracing::{error, info};

const BIN_NAME: &str = "loader64";

#[derive(Parser, Debug)]
#[command(name = BIN_NAME, author, version, about = "loader64 - Everdrive64 USB-tool", long_about = None)]
struct Args {
    /// Write ROM to SDRAM (rom.z64)
    #[arg(short, long, value_name = "ROM")]
    file: Option<PathBuf>,

    /// Session settings (TOML: read_timeout_ms, write_timeout_ms, tail_fill)
    #[arg(short, long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Prints the classic progress lines to stdout and forwards everything to
/// tracing.
struct ConsoleObserver;

impl LoaderObserver for ConsoleObserver {
    fn on_event(&self, event: &LoaderEvent) {
        TracingObserver.on_event(event);

        let mut out = io::stdout().lock();
        // Progress output is best effort
        let _ = match event {
            LoaderEvent::StateChanged {
                to: SessionState::LivenessConfirmed,
                ..
            } => writeln!(out, "init test: ok"),
            LoaderEvent::StateChanged {
                to: SessionState::Filled,
                ..
            } => writeln!(out, "fill test: ok"),
            LoaderEvent::TransferStarted { .. } => write!(out, "sending"),
            LoaderEvent::ChunkSent { bytes_read, .. } if *bytes_read > 0 => write!(out, "."),
            LoaderEvent::TransferComplete => writeln!(out, "\ndone"),
            _ => Ok(()),
        };
        let _ = out.flush();
    }
}

fn init_tracing(verbose: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("{BIN_NAME}: logging already initialised");
    }
}

/// Exit status for a finished run.
///
/// A device that does not acknowledge ends the run cleanly with status 0;
/// a failed close always forces a failure.
fn exit_code_for(upload: &Result<(), SessionError>, closed: bool) -> u8 {
    let upload_ok = match upload {
        Ok(()) => true,
        Err(e) => e.is_not_running(),
    };
    if upload_ok && closed { 0 } else { 1 }
}

fn run(file: &Path, config_path: Option<&Path>) -> Result<u8> {
    let config = match config_path {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    let plan = TransferPlan::for_file(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let image =
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;

    let mut session =
        DeviceSession::open(config, ConsoleObserver).context("Unable to open ftdi device")?;

    let upload = session.upload(&plan, image);
    match &upload {
        Ok(()) => info!("Upload finished"),
        Err(e) if e.is_not_running() => println!("{e}"),
        Err(e) => {
            println!();
            error!("{e}");
        }
    }

    let closed = match session.close() {
        Ok(()) => true,
        Err(e) => {
            error!("Unable to close ftdi device: {e}");
            false
        }
    };

    Ok(exit_code_for(&upload, closed))
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    init_tracing(args.verbose);

    let Some(file) = args.file else {
        println!("{BIN_NAME}: missing operand");
        println!("Try '{BIN_NAME} --help' for more information.");
        return ExitCode::FAILURE;
    };

    match run(&file, args.config.as_deref()) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed64_core::{CheckStage, TransportError};

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([BIN_NAME, "-v", "-f", "rom.z64"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.file, Some(PathBuf::from("rom.z64")));

        let args = Args::try_parse_from([BIN_NAME, "--file=game.z64"]).unwrap();
        assert!(!args.verbose);
        assert_eq!(args.file, Some(PathBuf::from("game.z64")));
    }

    #[test]
    fn test_missing_file_parses_to_none() {
        let args = Args::try_parse_from([BIN_NAME, "-v"]).unwrap();
        assert!(args.file.is_none());
    }

    #[test]
    fn test_help_is_not_an_error_exit() {
        let err = Args::try_parse_from([BIN_NAME, "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&Ok(()), true), 0);
        assert_eq!(exit_code_for(&Ok(()), false), 1);

        let not_running = Err(SessionError::NotRunning {
            stage: CheckStage::Liveness,
            got: 0,
        });
        assert_eq!(exit_code_for(&not_running, true), 0);
        assert_eq!(exit_code_for(&not_running, false), 1);

        let write_failed = Err(SessionError::ChunkWrite {
            index: 3,
            source: TransportError::WriteFailed("pipe".into()),
        });
        assert_eq!(exit_code_for(&write_failed, true), 1);

        // A USB error during the test exchange is not a "not running" outcome
        let liveness_io = Err(SessionError::Transport(TransportError::ReadFailed(
            "stall".into(),
        )));
        assert_eq!(exit_code_for(&liveness_io, true), 1);
    }
}
