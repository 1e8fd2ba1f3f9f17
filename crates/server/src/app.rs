use std::sync::Arc;

use orchestrator::{
    Decoder, DecoderLoader, HostPlatform, ModelTrainer, Orchestrator, OrchestratorError,
    SessionOutcome,
};
use session::{SessionController, Transport};
use shared::domain::Mode;
use tracing::{info, warn};

use crate::{
    config::{ConfigError, Settings},
    recording::JsonRecordSink,
};

/// Decoding backends supplied by the embedding application. The classifier
/// itself lives outside this workspace.
#[derive(Default)]
pub struct Backends {
    pub decoder: Option<Box<dyn Decoder>>,
    /// Restores `run.model_path` in online mode when no decoder is given.
    pub loader: Option<Box<dyn DecoderLoader>>,
    pub trainer: Option<Box<dyn ModelTrainer>>,
}

/// Wires a validated configuration into a ready-to-run session.
pub struct SpellerApp {
    pub controller: Arc<SessionController>,
    pub orchestrator: Orchestrator,
}

impl SpellerApp {
    pub fn build(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        host: Arc<dyn HostPlatform>,
        backends: Backends,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let config = settings.orchestrator_config()?;

        let Backends {
            mut decoder,
            loader,
            trainer,
        } = backends;
        if settings.run.mode == Mode::Online && decoder.is_none() {
            match (loader, &settings.run.model_path) {
                (Some(loader), Some(path)) => {
                    let loaded = loader.load(path).map_err(|source| ConfigError::ModelLoad {
                        path: path.clone(),
                        source,
                    })?;
                    info!(path = %path.display(), "decoding model loaded");
                    decoder = Some(loaded);
                }
                _ => warn!(
                    "online mode without a decoder backend; the first processing request will abort the session"
                ),
            }
        }

        let (controller, events) = SessionController::new(transport);
        let mut orchestrator = Orchestrator::new(controller.clone(), events, host, config)
            .with_sink(Box::new(JsonRecordSink::new(
                settings.session.recording_dir.clone(),
            )));
        if let Some(decoder) = decoder {
            orchestrator = orchestrator.with_decoder(decoder);
        }
        if let Some(trainer) = trainer {
            orchestrator = orchestrator.with_trainer(trainer);
        }

        info!(
            mode = settings.run.mode.as_str(),
            rows = settings.matrix.rows,
            cols = settings.matrix.cols,
            "session configured"
        );
        Ok(Self {
            controller,
            orchestrator,
        })
    }

    pub async fn run(self) -> Result<SessionOutcome, OrchestratorError> {
        self.orchestrator.run().await
    }
}
