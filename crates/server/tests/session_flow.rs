use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use orchestrator::{Decoder, DecoderLoader, Phase};
use session::{RecordingTransport, RunStateHandle};
use shared::{
    domain::{Mode, RunState, Selection, SelectionCoords, ServerState, SessionRecord, TrialLog},
    error::{ErrorCode, SpellerError},
    protocol::OutboundCommand,
};
use speller_server::{host::ConsoleHost, Backends, ConfigError, Settings, SpellerApp};

const TIMEOUT: Duration = Duration::from_secs(5);

const MSEQ_31: [u8; 31] = [
    0, 1, 1, 1, 1, 1, 1, 0, 1, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 1, 1, 0, 1, 1, 0, 1, 0, 0, 1, 0,
];

fn client() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40300))
}

fn small_matrix(recording_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.matrix.rows = 2;
    settings.matrix.cols = 3;
    settings.matrix.base_sequence = MSEQ_31.to_vec();
    settings.session.recording_dir = recording_dir.to_path_buf();
    settings
}

fn command_names(transport: &RecordingTransport) -> Vec<&'static str> {
    transport
        .sent_commands()
        .iter()
        .map(OutboundCommand::name)
        .collect()
}

struct FirstCellDecoder;

impl Decoder for FirstCellDecoder {
    fn check_feasibility(&self, trials: &TrialLog) -> bool {
        !trials.is_empty()
    }

    fn decode(&mut self, _trials: &TrialLog) -> Result<Selection, SpellerError> {
        Ok(Selection {
            coords: SelectionCoords {
                matrix: 0,
                row: 0,
                col: 0,
            },
            label: "A".into(),
        })
    }
}

#[derive(Default)]
struct PathLoader {
    loaded: Arc<Mutex<Vec<PathBuf>>>,
    fail: bool,
}

impl DecoderLoader for PathLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Decoder>, SpellerError> {
        self.loaded
            .lock()
            .expect("loaded paths")
            .push(path.to_path_buf());
        if self.fail {
            return Err(SpellerError::critical(ErrorCode::ModelMissing, "corrupt model"));
        }
        Ok(Box::new(FirstCellDecoder))
    }
}

fn online(recording_dir: &Path, model: &Path) -> Settings {
    let mut settings = small_matrix(recording_dir);
    settings.run.mode = Mode::Online;
    settings.run.model_path = Some(model.to_path_buf());
    settings
}

#[tokio::test]
async fn train_session_is_recorded_to_disk() {
    let recordings = tempfile::tempdir().expect("tempdir");
    let mut settings = small_matrix(recordings.path());
    settings.run.user = "P01".into();
    settings.run.run = 2;

    let transport = Arc::new(RecordingTransport::new());
    let run_state = RunStateHandle::new();
    let app = SpellerApp::build(
        &settings,
        transport.clone(),
        Arc::new(run_state.clone()),
        Backends::default(),
    )
    .expect("app");
    let mut phase = app.orchestrator.phase();
    let mut server = app.controller.server_state();
    let session = tokio::spawn(app.run());

    run_state.set(RunState::Ready);
    tokio::time::timeout(TIMEOUT, server.wait_until(|s| *s == ServerState::Up))
        .await
        .expect("timely")
        .expect("server up");

    transport.inject(client(), r#"{"event_type":"waiting"}"#);
    transport.inject(client(), r#"{"event_type":"ready"}"#);
    tokio::time::timeout(TIMEOUT, phase.wait_until(|p| *p == Phase::Armed))
        .await
        .expect("timely")
        .expect("armed");

    run_state.set(RunState::Running);
    tokio::time::timeout(TIMEOUT, phase.wait_until(|p| *p == Phase::Running))
        .await
        .expect("timely")
        .expect("running");
    for cycle in 0..4 {
        transport.inject(
            client(),
            format!(
                r#"{{"event_type":"train","cycle":{cycle},"onset":{}.5,"trial":0,"matrix_idx":0,"unit_idx":0,"level_idx":0,"command_idx":4}}"#,
                cycle * 2
            ),
        );
    }
    run_state.set(RunState::Stopped);
    tokio::time::timeout(TIMEOUT, phase.wait_until(|p| *p == Phase::Stopping))
        .await
        .expect("timely")
        .expect("stopping");
    transport.inject(client(), r#"{"event_type":"close"}"#);

    let outcome = tokio::time::timeout(TIMEOUT, session)
        .await
        .expect("timely")
        .expect("join")
        .expect("outcome");
    assert!(outcome.aborted.is_none());
    assert_eq!(outcome.record.trials.len(), 4);

    let sent = transport.sent_commands();
    let OutboundCommand::SetParameters(params) = &sent[0] else {
        panic!("first command must be setParameters, got {:?}", sent[0]);
    };
    assert_eq!(params, &settings.experiment_parameters().expect("parameters"));
    assert_eq!(params.matrices[0].item_list.len(), 6);

    let files: Vec<_> = std::fs::read_dir(recordings.path())
        .expect("recording dir")
        .map(|entry| entry.expect("entry").path())
        .collect();
    assert_eq!(files.len(), 1);
    let saved: SessionRecord =
        serde_json::from_str(&std::fs::read_to_string(&files[0]).expect("read")).expect("json");
    assert_eq!(saved.session_id, outcome.record.session_id);
    assert_eq!(saved.trials.len(), 4);
    assert!(saved.finished_at.is_some());
    assert_eq!(saved.label, settings.run_label());
    let name = files[0].file_name().and_then(|n| n.to_str()).expect("name");
    assert!(name.contains("_P01_Train_R02_train_"), "{name}");
}

#[tokio::test]
async fn closed_console_input_stops_an_armed_session() {
    let recordings = tempfile::tempdir().expect("tempdir");
    let settings = small_matrix(recordings.path());
    let transport = Arc::new(RecordingTransport::new());
    let run_state = RunStateHandle::new();
    let app = SpellerApp::build(
        &settings,
        transport.clone(),
        Arc::new(run_state.clone()),
        Backends::default(),
    )
    .expect("app");
    let mut phase = app.orchestrator.phase();
    let mut server = app.controller.server_state();
    let console = tokio::spawn(
        ConsoleHost::new(run_state.clone()).attach(&b""[..], app.orchestrator.phase()),
    );
    let session = tokio::spawn(app.run());

    tokio::time::timeout(TIMEOUT, server.wait_until(|s| *s == ServerState::Up))
        .await
        .expect("timely")
        .expect("server up");
    tokio::time::timeout(TIMEOUT, console)
        .await
        .expect("timely")
        .expect("join")
        .expect("console");
    assert_eq!(run_state.get(), RunState::Stopped);

    transport.inject(client(), r#"{"event_type":"waiting"}"#);
    transport.inject(client(), r#"{"event_type":"ready"}"#);
    tokio::time::timeout(TIMEOUT, phase.wait_until(|p| *p == Phase::Stopping))
        .await
        .expect("timely")
        .expect("stopping");
    transport.inject(client(), r#"{"event_type":"close"}"#);

    let outcome = tokio::time::timeout(TIMEOUT, session)
        .await
        .expect("timely")
        .expect("join")
        .expect("outcome");
    assert!(outcome.aborted.is_none());
    assert_eq!(command_names(&transport), vec!["setParameters", "stop"]);
}

#[tokio::test]
async fn online_session_decodes_with_the_configured_model() {
    let recordings = tempfile::tempdir().expect("tempdir");
    let model = tempfile::NamedTempFile::new().expect("model file");
    let settings = online(recordings.path(), model.path());
    let loader = PathLoader::default();
    let loaded = loader.loaded.clone();

    let transport = Arc::new(RecordingTransport::new());
    let run_state = RunStateHandle::new();
    let app = SpellerApp::build(
        &settings,
        transport.clone(),
        Arc::new(run_state.clone()),
        Backends {
            loader: Some(Box::new(loader)),
            ..Backends::default()
        },
    )
    .expect("app");
    assert_eq!(
        *loaded.lock().expect("loaded paths"),
        vec![model.path().to_path_buf()]
    );

    let mut phase = app.orchestrator.phase();
    let mut server = app.controller.server_state();
    let session = tokio::spawn(app.run());
    run_state.set(RunState::Ready);
    tokio::time::timeout(TIMEOUT, server.wait_until(|s| *s == ServerState::Up))
        .await
        .expect("timely")
        .expect("server up");
    transport.inject(client(), r#"{"event_type":"waiting"}"#);
    transport.inject(client(), r#"{"event_type":"ready"}"#);
    tokio::time::timeout(TIMEOUT, phase.wait_until(|p| *p == Phase::Armed))
        .await
        .expect("timely")
        .expect("armed");
    run_state.set(RunState::Running);
    tokio::time::timeout(TIMEOUT, phase.wait_until(|p| *p == Phase::Running))
        .await
        .expect("timely")
        .expect("running");

    transport.inject(
        client(),
        r#"{"event_type":"test","cycle":0,"onset":1.0,"trial":0,"matrix_idx":0,"unit_idx":0,"level_idx":0}"#,
    );
    transport.inject(client(), r#"{"event_type":"processPlease"}"#);
    let mut sent = transport.subscribe();
    tokio::time::timeout(TIMEOUT, async {
        while !command_names(&transport).contains(&"selection") {
            let _ = sent.recv().await;
        }
    })
    .await
    .expect("selection sent");

    run_state.set(RunState::Stopped);
    tokio::time::timeout(TIMEOUT, phase.wait_until(|p| *p == Phase::Stopping))
        .await
        .expect("timely")
        .expect("stopping");
    transport.inject(client(), r#"{"event_type":"close"}"#);
    let outcome = tokio::time::timeout(TIMEOUT, session)
        .await
        .expect("timely")
        .expect("join")
        .expect("outcome");
    assert!(outcome.aborted.is_none());
    assert_eq!(outcome.record.selections.len(), 1);
}

#[tokio::test]
async fn unreadable_model_fails_setup() {
    let recordings = tempfile::tempdir().expect("tempdir");
    let model = tempfile::NamedTempFile::new().expect("model file");
    let result = SpellerApp::build(
        &online(recordings.path(), model.path()),
        Arc::new(RecordingTransport::new()),
        Arc::new(RunStateHandle::new()),
        Backends {
            loader: Some(Box::new(PathLoader {
                fail: true,
                ..PathLoader::default()
            })),
            ..Backends::default()
        },
    );
    assert!(matches!(
        result.err(),
        Some(ConfigError::ModelLoad { path, .. }) if path == model.path()
    ));
}

#[tokio::test]
async fn invalid_settings_never_start_a_session() {
    let settings = Settings::default();
    let result = SpellerApp::build(
        &settings,
        Arc::new(RecordingTransport::new()),
        Arc::new(RunStateHandle::new()),
        Backends::default(),
    );
    assert!(matches!(
        result.err(),
        Some(ConfigError::MissingSequence)
    ));
}
