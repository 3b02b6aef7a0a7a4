//! Host-side dry run: feeds a recorded edge trace from stdin through the
//! debouncer and logs what would have been sent to the sinks.

use flexi_logger::{Duplicate, FileSpec, FlexiLoggerError, Logger, LoggerHandle};
use meter_pulse::{Config, DryRunTransport, EdgeSource as _, ReplayError, ReplaySource};
use std::process::ExitCode;

#[derive(Debug, thiserror::Error)]
enum Failure {
    #[error("failed to start logger: {0}")]
    Logger(#[from] FlexiLoggerError),
    #[error(transparent)]
    Trace(#[from] ReplayError),
}

fn start_logging(config: &Config) -> Result<LoggerHandle, FlexiLoggerError> {
    let logger = Logger::try_with_env_or_str("debug")?.format(flexi_logger::detailed_format);
    match &config.log_file {
        Some(path) => logger.log_to_file(FileSpec::try_from(path)?).append().duplicate_to_stderr(Duplicate::Warn).start(),
        None => logger.log_to_stderr().start(),
    }
}

fn replay(config: &Config) -> Result<(), Failure> {
    let seed = meter_pulse::reconciler(config).map(|_| {
        log::info!("dry run: not reading the counter back, starting from 0");
        0
    });

    let mut debouncer = meter_pulse::assemble(config, seed, DryRunTransport::default());
    ReplaySource::new(std::io::stdin().lock()).run(&mut debouncer)?;

    log::info!(
        "replay done: {} accepted, {} rejected, {} requests",
        debouncer.accepted(),
        debouncer.rejected(),
        debouncer.dispatcher().transport().sent()
    );
    Ok(())
}

pub fn main() -> ExitCode {
    let config = match Config::from_lookup(|key| std::env::var(key).ok()) {
        Ok(config) => config,
        Err(err) => {
            // No logger yet: where it should write is part of the configuration.
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = start_logging(&config).map_err(Failure::from).and_then(|_logger| {
        let result = replay(&config);
        if let Err(err) = &result {
            log::error!("{err}");
        }
        result
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Logger(err)) => {
            eprintln!("failed to start logger: {err}");
            ExitCode::FAILURE
        }
        Err(Failure::Trace(_)) => ExitCode::FAILURE,
    }
}
