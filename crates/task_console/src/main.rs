use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use task_console::config::EnvConfig;
use task_console::console::{
    build_client, command_from_args, print_until_done, ConsoleError, RunOutcome,
};
use task_console::logging::init_tracing;
use task_stream::ChannelObserver;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(outcome) => outcome.exit_code(),
        Err(error) => {
            eprintln!("task_console: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<RunOutcome, ConsoleError> {
    let config = EnvConfig::from_env()?;
    init_tracing(&config.log_filter);
    let command = command_from_args(std::env::args().skip(1)).ok_or(ConsoleError::MissingCommand)?;

    let (observer, mut events) = ChannelObserver::channel();
    let client = build_client(&config, Arc::new(observer))?;
    let handle = client.start_command(command).await?;
    info!(handle = %handle, profile = ?config.profile, "run started");

    let mut stdout = io::stdout();
    tokio::select! {
        outcome = print_until_done(&mut events, &mut stdout) => outcome,
        interrupted = tokio::signal::ctrl_c() => {
            if let Err(error) = interrupted {
                warn!(%error, "failed to listen for ctrl-c");
            }
            if let Err(error) = client.cancel().await {
                warn!(%error, "cancel after interrupt failed");
            }
            Ok(RunOutcome::Interrupted)
        }
    }
}
