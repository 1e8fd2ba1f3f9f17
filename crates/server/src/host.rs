//! Console stand-in for the host platform: turns operator commands typed on
//! stdin into `RunState` transitions.

use std::str::FromStr;

use orchestrator::Phase;
use session::{RunStateHandle, StateWatch};
use shared::domain::RunState;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Play,
    Pause,
    Resume,
    Stop,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "play" | "start" => Ok(Self::Play),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "stop" | "quit" => Ok(Self::Stop),
            other => Err(format!("unknown command `{other}`")),
        }
    }
}

/// Allowed run state transitions for each console command.
pub fn transition(current: RunState, command: ConsoleCommand) -> Option<RunState> {
    match (command, current) {
        (ConsoleCommand::Play, RunState::Ready) => Some(RunState::Running),
        (ConsoleCommand::Pause, RunState::Running) => Some(RunState::Paused),
        (ConsoleCommand::Resume, RunState::Paused) => Some(RunState::Running),
        (ConsoleCommand::Stop, RunState::Stopped) => None,
        (ConsoleCommand::Stop, _) => Some(RunState::Stopped),
        _ => None,
    }
}

#[derive(Clone)]
pub struct ConsoleHost {
    run_state: RunStateHandle,
}

impl ConsoleHost {
    pub fn new(run_state: RunStateHandle) -> Self {
        Self { run_state }
    }

    /// Marks the host ready to start a session.
    pub fn ready(&self) {
        self.run_state.set(RunState::Ready);
    }

    pub fn apply(&self, command: ConsoleCommand) -> Option<RunState> {
        let current = self.run_state.get();
        let next = transition(current, command)?;
        self.run_state.set(next);
        Some(next)
    }

    /// Marks the host ready and reads commands only after the session has left
    /// [`Phase::WaitHostReady`].
    pub async fn attach<R>(self, reader: R, mut phase: StateWatch<Phase>) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        self.ready();
        let started = phase
            .wait_until(|p| !matches!(p, Phase::Init | Phase::WaitHostReady))
            .await;
        if started.is_err() {
            warn!("session ended before it picked up the ready host");
            return Ok(());
        }
        self.drive(reader).await
    }

    /// Reads commands until EOF. Closing the input stops the run.
    pub async fn drive<R>(self, reader: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<ConsoleCommand>() {
                Ok(command) => match self.apply(command) {
                    Some(state) => info!(?command, ?state, "run state requested"),
                    None => warn!(
                        ?command,
                        current = ?self.run_state.get(),
                        "command not allowed in the current run state"
                    ),
                },
                Err(error) => warn!(%error, "try play, pause, resume or stop"),
            }
        }
        info!("console input closed, stopping the run");
        self.apply(ConsoleCommand::Stop);
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/host_tests.rs"]
mod tests;
