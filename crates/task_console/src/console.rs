//! Wiring a client for the chosen profile and printing what it emits.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use task_stream::{
    ClientError, ClientEvent, EventKind, EventStreamClient, Message, TaskObserver,
    TerminalConnectionError,
};
use task_stream_http::{HttpTaskClient, HttpTaskConfig, HttpTaskError};
use task_stream_mock::{demo_script, ScriptedTaskApi, ScriptedTransport};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::{ConfigError, EnvConfig, ProfileChoice};

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Http(#[from] HttpTaskError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
    #[error("usage: task_console <command...>")]
    MissingCommand,
}

/// How a console run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { has_error: bool },
    ConnectionLost(TerminalConnectionError),
    Interrupted,
    /// The client went away without a terminal event.
    Abandoned,
}

impl RunOutcome {
    pub fn exit_status(&self) -> u8 {
        match self {
            Self::Completed { has_error: false } => 0,
            Self::Interrupted => 130,
            _ => 1,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

/// Joined CLI arguments, or `None` when nothing but whitespace was given.
pub fn command_from_args(args: impl IntoIterator<Item = String>) -> Option<String> {
    let command = args.into_iter().collect::<Vec<_>>().join(" ");
    let command = command.trim();
    (!command.is_empty()).then(|| command.to_string())
}

pub fn build_client(
    config: &EnvConfig,
    observer: Arc<dyn TaskObserver>,
) -> Result<EventStreamClient, ConsoleError> {
    let profile = config.profile.service_profile();
    if config.profile == ProfileChoice::Mock {
        return Ok(EventStreamClient::new(
            profile,
            Arc::new(ScriptedTaskApi::new()),
            Arc::new(ScriptedTransport::new(demo_script())),
            observer,
        ));
    }

    let mut http_config = HttpTaskConfig::new(config.base_url.clone())
        .with_user_agent(concat!("task_console/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = config.timeout {
        http_config = http_config.with_timeout(timeout);
    }
    let http = Arc::new(HttpTaskClient::for_profile(http_config, &profile)?);
    Ok(EventStreamClient::new(profile, http.clone(), http, observer))
}

/// One printable line for a finalized message; in-progress stream updates are skipped.
pub fn render_message(message: &Message) -> Option<String> {
    if message.is_streaming {
        return None;
    }

    let line = match message.kind {
        EventKind::Stream if message.is_thinking => format!("[thinking] {}", message.content),
        EventKind::Stream | EventKind::Result => message.content.clone(),
        EventKind::AskUser => match &message.options {
            Some(options) if !options.is_empty() => {
                format!("[question] {} ({})", message.content, options.join(" / "))
            }
            _ => format!("[question] {}", message.content),
        },
        EventKind::UserResponse => format!("> {}", message.content),
        EventKind::Error => format!("[error] {}", message.content),
        EventKind::Completion => format!("[done] {}", message.content),
        EventKind::Unknown => return None,
    };
    Some(line)
}

/// Print client events until the run reaches a terminal event.
pub async fn print_until_done<W: Write>(
    events: &mut UnboundedReceiver<ClientEvent>,
    out: &mut W,
) -> Result<RunOutcome, ConsoleError> {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Message(message) => {
                if let Some(line) = render_message(&message) {
                    writeln!(out, "{line}")?;
                    out.flush()?;
                }
            }
            ClientEvent::TaskComplete { has_error } => {
                return Ok(RunOutcome::Completed { has_error });
            }
            ClientEvent::ConnectionError(error) => {
                writeln!(out, "[connection lost] {error}")?;
                return Ok(RunOutcome::ConnectionLost(error));
            }
        }
    }
    Ok(RunOutcome::Abandoned)
}
