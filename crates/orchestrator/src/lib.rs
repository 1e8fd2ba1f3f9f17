//! Experiment orchestrator.
//!
//! Sequences bring-up, parameter handoff, play/pause/stop and on-demand
//! decoding. It is the only component that sends commands through the
//! [`SessionController`] and the only one that decides to decode.
//!
//! Phases:
//! `Init -> WaitHostReady -> WaitRemoteUp -> ParamsSent -> WaitRemoteReady
//! -> Armed -> Running <-> Paused -> Stopping -> Terminated`.
//!
//! Every wait is event driven (watch channels and the event queue) and
//! unbounded, except the optional teardown timeout.

use std::{fmt::Debug, sync::Arc, time::Duration};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use session::{EventReceiver, SessionController, SessionError, StateCell, StateWatch};
use shared::{
    domain::{RemoteAppState, RunLabel, RunState, SessionRecord},
    error::{ErrorCode, Importance, SpellerError},
    protocol::{ExperimentEvent, ExperimentParameters},
};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

mod collaborators;

pub use collaborators::{Decoder, DecoderLoader, HostPlatform, ModelTrainer, RecordSink};

pub const DEFAULT_DECODE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    WaitHostReady,
    WaitRemoteUp,
    ParamsSent,
    WaitRemoteReady,
    Armed,
    Running,
    Paused,
    Stopping,
    Terminated,
}

/// Remote state that marks the stimulus application as gone during
/// teardown. Deployments differ, so it is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalRemoteState {
    #[default]
    Down,
    Finished,
}

impl TerminalRemoteState {
    pub fn remote_state(self) -> RemoteAppState {
        match self {
            TerminalRemoteState::Down => RemoteAppState::Down,
            TerminalRemoteState::Finished => RemoteAppState::Finished,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub parameters: ExperimentParameters,
    /// Copied into the session record.
    pub label: RunLabel,
    pub terminal_remote_state: TerminalRemoteState,
    /// Recheck period of the decode feasibility predicate while a process
    /// request is pending.
    pub decode_poll_interval: Duration,
    /// `None` waits for the terminal remote state forever.
    pub teardown_timeout: Option<Duration>,
}

impl OrchestratorConfig {
    pub fn new(parameters: ExperimentParameters) -> Self {
        Self {
            parameters,
            label: RunLabel::default(),
            terminal_remote_state: TerminalRemoteState::default(),
            decode_poll_interval: DEFAULT_DECODE_POLL_INTERVAL,
            teardown_timeout: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session setup failed: {0}")]
    Setup(#[source] SessionError),
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub record: SessionRecord,
    /// The critical error that forced teardown, if any.
    pub aborted: Option<SpellerError>,
}

enum Interrupt {
    Critical(SpellerError),
    Setup(OrchestratorError),
}

impl From<SessionError> for Interrupt {
    fn from(value: SessionError) -> Self {
        Interrupt::Critical(SpellerError::critical(
            ErrorCode::Internal,
            value.to_string(),
        ))
    }
}

pub struct Orchestrator {
    controller: Arc<SessionController>,
    events: EventReceiver,
    events_open: bool,
    host: Arc<dyn HostPlatform>,
    config: OrchestratorConfig,
    decoder: Option<Box<dyn Decoder>>,
    trainer: Option<Box<dyn ModelTrainer>>,
    sink: Option<Box<dyn RecordSink>>,
    record: SessionRecord,
    process_required: bool,
    server_started: bool,
    stopping: bool,
    phase: StateCell<Phase>,
}

impl Orchestrator {
    pub fn new(
        controller: Arc<SessionController>,
        events: EventReceiver,
        host: Arc<dyn HostPlatform>,
        config: OrchestratorConfig,
    ) -> Self {
        let record = SessionRecord::new(config.parameters.mode, config.label.clone());
        Self {
            controller,
            events,
            events_open: true,
            host,
            config,
            decoder: None,
            trainer: None,
            sink: None,
            record,
            process_required: false,
            server_started: false,
            stopping: false,
            phase: StateCell::new(Phase::Init),
        }
    }

    pub fn with_decoder(mut self, decoder: Box<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_trainer(mut self, trainer: Box<dyn ModelTrainer>) -> Self {
        self.trainer = Some(trainer);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn phase(&self) -> StateWatch<Phase> {
        self.phase.watch()
    }

    /// Runs the session to completion. Only a transport start failure is
    /// returned as an error; critical failures later on force teardown and
    /// are reported in [`SessionOutcome::aborted`].
    pub async fn run(mut self) -> Result<SessionOutcome, OrchestratorError> {
        let aborted = match self.drive().await {
            Ok(()) => None,
            Err(Interrupt::Critical(err)) => {
                error!(%err, "critical failure, forcing teardown");
                Some(err)
            }
            Err(Interrupt::Setup(err)) => {
                self.set_phase(Phase::Terminated);
                return Err(err);
            }
        };
        Ok(self.teardown(aborted).await)
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.phase.set(phase);
        if previous != phase {
            info!(?previous, current = ?phase, "phase transition");
        }
    }

    async fn drive(&mut self) -> Result<(), Interrupt> {
        self.set_phase(Phase::WaitHostReady);
        let mut run = self.host.run_state();
        self.hold_until(&mut run, |state| *state == RunState::Ready)
            .await?;

        self.set_phase(Phase::WaitRemoteUp);
        self.controller
            .start_server()
            .await
            .map_err(|e| Interrupt::Setup(OrchestratorError::Setup(e)))?;
        self.server_started = true;
        let mut remote = self.controller.remote_state();
        self.hold_until(&mut remote, |state| *state != RemoteAppState::Down)
            .await?;

        self.controller
            .send_parameters(self.config.parameters.clone());
        self.set_phase(Phase::ParamsSent);

        self.set_phase(Phase::WaitRemoteReady);
        let remote_now = self
            .hold_until(&mut remote, |state| *state != RemoteAppState::Up)
            .await?;
        if remote_now != RemoteAppState::Ready {
            warn!(state = ?remote_now, "stimulus app left the waiting state without becoming ready");
        }

        self.set_phase(Phase::Armed);
        let run_now = self
            .hold_until(&mut run, |state| {
                matches!(state, RunState::Running | RunState::Stopped)
            })
            .await?;
        if run_now == RunState::Stopped {
            info!("stopped before play");
            return Ok(());
        }

        self.controller.play();
        self.set_phase(Phase::Running);
        self.running_loop(&mut run).await
    }

    async fn running_loop(&mut self, run: &mut StateWatch<RunState>) -> Result<(), Interrupt> {
        let mut ticker = tokio::time::interval(self.config.decode_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            match run.mark_seen() {
                RunState::Stopped => return Ok(()),
                RunState::Paused => {
                    self.controller.pause();
                    self.set_phase(Phase::Paused);
                    let after = self
                        .hold_until(run, |state| *state != RunState::Paused)
                        .await?;
                    match after {
                        RunState::Stopped => return Ok(()),
                        RunState::Running => self.controller.resume(),
                        other => warn!(state = ?other, "left pause without resuming"),
                    }
                    self.set_phase(Phase::Running);
                    continue;
                }
                _ => {}
            }

            self.try_decode()?;

            tokio::select! {
                biased;
                changed = run.changed() => {
                    changed?;
                }
                event = self.events.recv(), if self.events_open => match event {
                    Some(event) => self.handle_event(event)?,
                    None => self.events_open = false,
                },
                _ = ticker.tick(), if self.process_required => {}
            }
        }
    }

    /// Waits for `predicate` on `watch` while still consuming events.
    async fn hold_until<T>(
        &mut self,
        watch: &mut StateWatch<T>,
        mut predicate: impl FnMut(&T) -> bool,
    ) -> Result<T, Interrupt>
    where
        T: Copy + PartialEq + Debug + Send + Sync + 'static,
    {
        loop {
            tokio::select! {
                biased;
                event = self.events.recv(), if self.events_open => match event {
                    Some(event) => self.handle_event(event)?,
                    None => self.events_open = false,
                },
                value = watch.wait_until(&mut predicate) => return Ok(value?),
            }
        }
    }

    fn handle_event(&mut self, event: ExperimentEvent) -> Result<(), Interrupt> {
        match event {
            ExperimentEvent::Onset(trial) => {
                debug!(trial = trial.trial, cycle = trial.cycle, onset = trial.onset, "onset");
                self.record.trials.push(trial);
            }
            ExperimentEvent::ProcessRequest => {
                debug!("processing requested");
                self.process_required = true;
            }
            ExperimentEvent::TrainModelRequest => return self.train_model(),
            ExperimentEvent::ResizeInfo(info) => self.record.resizes.push(info),
            ExperimentEvent::Ready => {
                let current = self.host.run_state().get();
                if matches!(current, RunState::NotReady | RunState::Ready) {
                    info!("stimulus app ready, requesting host run state ready");
                    self.host.request_run_state(RunState::Ready);
                } else {
                    debug!(state = ?current, "stimulus app ready while run already in progress");
                }
            }
            other => debug!(event_type = other.event_type(), "ignoring event"),
        }
        Ok(())
    }

    fn try_decode(&mut self) -> Result<(), Interrupt> {
        if !self.process_required {
            return Ok(());
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(Interrupt::Critical(SpellerError::critical(
                ErrorCode::ModelMissing,
                "cannot process the trial: no decoding model has been loaded or trained",
            )));
        };
        if !decoder.check_feasibility(&self.record.trials) {
            debug!(
                trials = self.record.trials.len(),
                "epoch not complete yet, waiting for more samples"
            );
            return Ok(());
        }

        self.process_required = false;
        match decoder.decode(&self.record.trials) {
            Ok(selection) => {
                self.controller.notify_selection(&selection);
                self.record.selections.push(selection);
                Ok(())
            }
            Err(err) => self.handle_error(err),
        }
    }

    fn train_model(&mut self) -> Result<(), Interrupt> {
        let Some(trainer) = self.trainer.as_mut() else {
            warn!("model training requested but no trainer is configured");
            return Ok(());
        };
        info!(trials = self.record.trials.len(), "training model");
        match trainer.train(&self.record.trials) {
            Ok(decoder) => {
                self.decoder = Some(decoder);
                self.controller.notify_model_trained();
                Ok(())
            }
            Err(err) => self.handle_error(err),
        }
    }

    /// Importance-keyed handler: critical errors force teardown, anything
    /// else is logged and the loop continues.
    fn handle_error(&self, err: SpellerError) -> Result<(), Interrupt> {
        match err.importance {
            Importance::Critical if !self.stopping => Err(Interrupt::Critical(err)),
            Importance::Critical | Importance::Important => {
                error!(code = ?err.code, message = %err.message, "session error");
                Ok(())
            }
            Importance::Mild => {
                warn!(code = ?err.code, message = %err.message, "session warning");
                Ok(())
            }
        }
    }

    async fn teardown(mut self, aborted: Option<SpellerError>) -> SessionOutcome {
        self.set_phase(Phase::Stopping);
        self.stopping = true;

        if self.server_started {
            if let Some(err) = &aborted {
                self.controller.notify_exception(err.message.clone());
            }
            self.controller.stop_stimulus();

            let terminal = self.config.terminal_remote_state.remote_state();
            let limit = self.config.teardown_timeout;
            let mut remote = self.controller.remote_state();
            let wait = self.hold_until(&mut remote, |state| *state == terminal);
            let reached = match limit {
                Some(limit) => match tokio::time::timeout(limit, wait).await {
                    Ok(result) => result.is_ok(),
                    Err(_) => {
                        warn!(?limit, ?terminal, "stimulus app did not reach terminal state in time");
                        false
                    }
                },
                None => wait.await.is_ok(),
            };
            if reached {
                info!(?terminal, "stimulus app closed");
            }

            if let Err(error) = self.controller.stop().await {
                error!(%error, "failed to stop session server");
            }
        }

        self.record.finished_at = Some(Utc::now());
        if let Some(sink) = self.sink.as_mut() {
            if let Err(error) = sink.persist(&self.record) {
                error!(%error, "failed to persist session record");
            }
        }

        self.set_phase(Phase::Terminated);
        SessionOutcome {
            record: self.record,
            aborted,
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
