//! Binary entry point: parse arguments, resolve options, set up file
//! logging, run the controller, and map failures to exit codes.

use std::fs::OpenOptions;
use std::path::Path;
use std::process;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use dirsift::args::Args;
use dirsift::controller::Controller;
use dirsift::errors::ScanError;
use dirsift::options::Options;
use dirsift::output::Output;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let options = match Options::resolve(args) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    };

    let _log_guard = match init_logging(&options) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    };

    let output = Output::new(options.no_color, options.quiet);
    let mut controller = match Controller::new(options, output) {
        Ok(controller) => controller,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    };

    match controller.run().await {
        Ok(()) => {}
        Err(ScanError::Quit(msg)) => {
            eprintln!("{msg}");
            process::exit(2);
        }
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    }
}

/// File logging is off unless `--log` is given; the guard keeps the
/// non-blocking writer flushing until the process exits.
fn init_logging(options: &Options) -> Result<Option<WorkerGuard>, ScanError> {
    let Some(log) = &options.log else {
        return Ok(None);
    };

    let parent = match log.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| {
        ScanError::Config(format!("Couldn't create log file at {}: {e}", log.display()))
    })?;
    let file_name = log.file_name().ok_or_else(|| {
        ScanError::Config(format!("Couldn't create log file at {}", log.display()))
    })?;
    // Fail fast when the path is not writable.
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .map_err(|e| {
            ScanError::Config(format!("Couldn't create log file at {}: {e}", log.display()))
        })?;

    let appender = tracing_appender::rolling::never(parent, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dirsift=debug")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(Some(guard))
}
