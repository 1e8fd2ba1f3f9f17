use super::*;

use std::{collections::HashMap, fs};

const MSEQ_63: [u8; 63] = [
    0, 1, 1, 1, 1, 1, 1, 0, 1, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 1, 1, 0, 1, 1, 0, 1, 0, 0, 1, 0,
    0, 1, 1, 1, 0, 0, 0, 1, 0, 1, 1, 1, 1, 0, 0, 1, 0, 1, 0, 0, 0, 1, 1, 0, 0, 0, 0, 1, 0, 0, 0,
    0,
];

fn valid_settings() -> Settings {
    let mut settings = Settings::default();
    settings.matrix.base_sequence = MSEQ_63.to_vec();
    settings
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |var: &str| map.get(var).cloned()
}

#[test]
fn defaults_match_the_stock_speller() {
    let settings = valid_settings();
    assert_eq!(
        settings.bind_addr().expect("addr"),
        "127.0.0.1:50000".parse().expect("literal")
    );
    assert_eq!(settings.run.mode, Mode::Train);
    assert_eq!(settings.session.terminal_remote_state, TerminalRemoteState::Down);
    assert!(settings.session.teardown_timeout_ms.is_none());
    settings.validate().expect("default matrix is valid");
}

#[test]
fn default_lags_are_evenly_spread() {
    assert_eq!(
        default_lags(63, 16),
        vec![0, 3, 7, 11, 15, 19, 23, 27, 31, 35, 39, 43, 47, 51, 55, 59]
    );
    assert_eq!(default_lags(31, 31), (0..31).collect::<Vec<u32>>());
}

#[test]
fn circular_shift_rotates_left() {
    assert_eq!(circular_shift(&[0, 1, 2, 3, 4], 1), vec![1, 2, 3, 4, 0]);
    assert_eq!(circular_shift(&[0, 1, 2], 3), vec![0, 1, 2]);
    assert!(circular_shift(&[], 5).is_empty());
}

#[test]
fn unsupported_sequence_length_is_rejected() {
    let mut settings = valid_settings();
    settings.matrix.base_sequence = vec![0, 1, 1, 0];
    assert!(matches!(
        settings.validate(),
        Err(ConfigError::UnsupportedSequenceLength(4))
    ));

    settings.matrix.base_sequence.clear();
    assert!(matches!(settings.validate(), Err(ConfigError::MissingSequence)));

    let mut settings = valid_settings();
    settings.matrix.base_sequence[3] = 2;
    assert!(matches!(settings.validate(), Err(ConfigError::NonBinarySequence)));
}

#[test]
fn too_many_commands_for_the_sequence_is_a_config_error() {
    let mut settings = valid_settings();
    settings.matrix.rows = 8;
    settings.matrix.cols = 8;
    assert!(matches!(
        settings.validate(),
        Err(ConfigError::NotEnoughLags {
            seq_len: 63,
            commands: 64
        })
    ));
}

#[test]
fn lag_layout_must_fit_the_matrix() {
    let mut settings = valid_settings();
    settings.matrix.lag_layout = Some(vec![0; 15]);
    assert!(matches!(
        settings.validate(),
        Err(ConfigError::LagLayoutSize {
            expected: 16,
            found: 15
        })
    ));

    let mut layout: Vec<u32> = (0..16).map(|i| i * 4).collect();
    layout[5] = 63;
    settings.matrix.lag_layout = Some(layout);
    assert!(matches!(
        settings.validate(),
        Err(ConfigError::LagOutOfRange { lag: 63, .. })
    ));
}

#[test]
fn online_mode_needs_an_existing_model() {
    let mut settings = valid_settings();
    settings.run.mode = Mode::Online;
    assert!(matches!(settings.validate(), Err(ConfigError::MissingModel)));

    settings.run.model_path = Some("/definitely/not/here.model".into());
    assert!(matches!(settings.validate(), Err(ConfigError::ModelNotFound(_))));

    let model = tempfile::NamedTempFile::new().expect("temp model");
    settings.run.model_path = Some(model.path().to_path_buf());
    settings.validate().expect("model exists");
}

#[test]
fn parameters_shift_the_base_sequence_by_each_lag() {
    let mut settings = valid_settings();
    settings.matrix.rows = 2;
    settings.matrix.cols = 3;
    settings.matrix.lag_layout = Some(vec![10, 0, 20, 30, 40, 50]);
    settings.matrix.labels = Some(["a", "b", "c", "d", "e", "f"].map(String::from).to_vec());

    let params = settings.experiment_parameters().expect("parameters");
    assert_eq!(params.matrices.len(), 1);
    let matrix = &params.matrices[0];
    assert_eq!((matrix.n_row, matrix.n_col), (2, 3));
    assert_eq!(matrix.item_list.len(), 6);

    let fourth = &matrix.item_list[3];
    assert_eq!((fourth.row, fourth.col), (1, 0));
    assert_eq!(fourth.label, "d");
    assert_eq!(fourth.lag, 30);
    assert_eq!(fourth.sequence, circular_shift(&MSEQ_63, 30));
    assert_eq!(matrix.item_list[1].sequence, MSEQ_63.to_vec());
}

#[test]
fn default_labels_follow_the_command_alphabet() {
    let settings = valid_settings();
    let labels = settings.labels().expect("labels");
    assert_eq!(labels.first().map(String::as_str), Some("A"));
    assert_eq!(labels.last().map(String::as_str), Some("P"));
}

#[test]
fn env_overrides_take_precedence() {
    let mut settings = valid_settings();
    apply_env_overrides(
        &mut settings,
        env(&[
            ("APP__BIND_ADDR", "0.0.0.0:6000"),
            ("APP__MODE", "online"),
            ("APP__RECORDING_DIR", "/tmp/speller"),
            ("APP__TERMINAL_REMOTE_STATE", "finished"),
        ]),
    )
    .expect("overrides");
    assert_eq!(settings.connection.ip, "0.0.0.0");
    assert_eq!(settings.connection.port, 6000);
    assert_eq!(settings.run.mode, Mode::Online);
    assert_eq!(settings.session.recording_dir, PathBuf::from("/tmp/speller"));
    assert_eq!(
        settings.session.terminal_remote_state,
        TerminalRemoteState::Finished
    );

    let err = apply_env_overrides(&mut settings, env(&[("APP__MODE", "replay")]))
        .expect_err("unknown mode");
    assert!(matches!(err, ConfigError::Env { var: "APP__MODE", .. }));
}

#[test]
fn settings_file_is_parsed_with_partial_sections() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("speller.toml");
    fs::write(
        &path,
        r##"
[connection]
port = 51000

[run]
mode = "Train"
train_cycles = 3

[colors]
color_background = "#101010"

[matrix]
rows = 2
cols = 2
base_sequence = [0, 1, 1, 1, 1, 1, 1, 0, 1, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 1, 1, 0, 1, 1, 0, 1, 0, 0, 1, 0]

[session]
terminal_remote_state = "finished"
teardown_timeout_ms = 2500
"##,
    )
    .expect("write");

    let settings = load_settings_from(&path).expect("settings");
    assert_eq!(settings.connection.port, 51000);
    assert_eq!(settings.connection.ip, "127.0.0.1");
    assert_eq!(settings.run.train_cycles, 3);
    assert_eq!(settings.run.test_cycles, 10);
    assert_eq!(settings.colors.color_background, "#101010");
    assert_eq!(settings.colors.color_box_1, "#ffffff");
    assert_eq!(settings.matrix.base_sequence.len(), 31);

    let config = settings.orchestrator_config().expect("orchestrator config");
    assert_eq!(config.terminal_remote_state, TerminalRemoteState::Finished);
    assert_eq!(config.teardown_timeout, Some(Duration::from_millis(2500)));
    assert_eq!(config.parameters.train_cycles, 3);
}

#[test]
fn malformed_settings_file_is_a_parse_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("speller.toml");
    fs::write(&path, "[matrix\nrows = ").expect("write");
    assert!(matches!(
        load_settings_from(&path),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn example_settings_file_is_valid() {
    let raw = include_str!("../../../../speller.example.toml");
    let settings = parse_settings(Path::new("speller.example.toml"), raw).expect("parse");
    settings.validate().expect("valid");
    assert_eq!(settings.sequence_length().expect("length"), 63);
    assert_eq!(settings.lags().expect("lags"), default_lags(63, 16));
}
