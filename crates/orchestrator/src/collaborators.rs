//! Seams to the collaborators the orchestrator drives but does not implement:
//! the host platform, the decoding model, model training and persistence.

use std::path::Path;

use session::{RunStateHandle, StateWatch};
use shared::{
    domain::{RunState, Selection, SessionRecord, TrialLog},
    error::SpellerError,
};

/// The host platform owns [`RunState`]; the orchestrator only reads it and
/// asks for transitions.
pub trait HostPlatform: Send + Sync {
    fn run_state(&self) -> StateWatch<RunState>;
    fn request_run_state(&self, state: RunState);
}

impl HostPlatform for RunStateHandle {
    fn run_state(&self) -> StateWatch<RunState> {
        self.watch()
    }

    fn request_run_state(&self, state: RunState) {
        self.set(state);
    }
}

/// A loaded decoding model with access to the buffered signal.
pub trait Decoder: Send {
    /// True once enough signal has been buffered after the relevant onset to
    /// cover a full decode epoch.
    fn check_feasibility(&self, trials: &TrialLog) -> bool;

    /// Decodes the last trial into the most probable command.
    fn decode(&mut self, trials: &TrialLog) -> Result<Selection, SpellerError>;
}

/// Restores a previously trained decoding model from disk.
pub trait DecoderLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn Decoder>, SpellerError>;
}

/// Fits a decoding model from the trials recorded so far.
pub trait ModelTrainer: Send {
    fn train(&mut self, trials: &TrialLog) -> Result<Box<dyn Decoder>, SpellerError>;
}

/// Receives the session record at teardown.
pub trait RecordSink: Send {
    fn persist(&mut self, record: &SessionRecord) -> Result<(), SpellerError>;
}
