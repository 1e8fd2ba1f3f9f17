use std::{
    fs, io,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use orchestrator::{OrchestratorConfig, TerminalRemoteState, DEFAULT_DECODE_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{Mode, RunLabel},
    error::SpellerError,
    protocol::{ColorScheme, ExperimentParameters, MatrixDescriptor, TargetDescriptor},
};
use thiserror::Error;

pub const DEFAULT_SETTINGS_FILE: &str = "speller.toml";
pub const SETTINGS_PATH_VAR: &str = "SPELLER_CONFIG";
pub const SUPPORTED_SEQUENCE_LENGTHS: [usize; 4] = [31, 63, 127, 255];

const COMMAND_LABELS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789/*-+.,_abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value `{value}` for {var}")]
    Env { var: &'static str, value: String },
    #[error("invalid bind address {0}")]
    BindAddr(String),
    #[error("matrix must have at least one row and one column")]
    EmptyMatrix,
    #[error("no base sequence configured in [matrix].base_sequence")]
    MissingSequence,
    #[error("sequence length of {0} not supported (use 31, 63, 127 or 255)")]
    UnsupportedSequenceLength(usize),
    #[error("base sequence must only contain 0 and 1")]
    NonBinarySequence,
    #[error(
        "sequence length {seq_len} is not enough to encode {commands} commands; \
         reduce the number of commands or use a longer sequence"
    )]
    NotEnoughLags { seq_len: usize, commands: usize },
    #[error("lag layout has {found} lags but the matrix has {expected} commands")]
    LagLayoutSize { expected: usize, found: usize },
    #[error("lag {lag} is outside [0, {seq_len})")]
    LagOutOfRange { lag: u32, seq_len: usize },
    #[error("{found} labels configured for {expected} commands")]
    LabelCount { expected: usize, found: usize },
    #[error("online mode requires [run].model_path")]
    MissingModel,
    #[error("model file {0} does not exist")]
    ModelNotFound(PathBuf),
    #[error("failed to load model {path}: {source}")]
    ModelLoad { path: PathBuf, source: SpellerError },
    #[error("stimulus executable {0} does not exist")]
    ExecutableNotFound(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub connection: ConnectionSettings,
    pub run: RunSettings,
    pub timings: Timings,
    pub colors: ColorScheme,
    pub matrix: MatrixSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub ip: String,
    pub port: u16,
    /// Stimulus application launched with `ip port` once the server is up.
    pub stimulus_exe: Option<PathBuf>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".into(),
            port: 50000,
            stimulus_exe: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub user: String,
    pub session: String,
    pub run: u32,
    pub mode: Mode,
    pub train_cycles: u32,
    pub train_trials: u32,
    pub test_cycles: u32,
    pub enable_photodiode: bool,
    pub fps_resolution: f64,
    pub model_path: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            user: "S0X".into(),
            session: "Train".into(),
            run: 1,
            mode: Mode::Train,
            train_cycles: 10,
            train_trials: 5,
            test_cycles: 10,
            enable_photodiode: true,
            fps_resolution: 60.0,
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub t_prev_text: f64,
    pub t_prev_iddle: f64,
    pub t_finish_text: f64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            t_prev_text: 1.0,
            t_prev_iddle: 1.0,
            t_finish_text: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixSettings {
    pub rows: usize,
    pub cols: usize,
    /// Binary m-sequence every command is a circular shift of.
    pub base_sequence: Vec<u8>,
    /// Row-major lags, e.g. the output of `speller_tools optimize-layout`.
    pub lag_layout: Option<Vec<u32>>,
    pub labels: Option<Vec<String>>,
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            rows: 4,
            cols: 4,
            base_sequence: Vec::new(),
            lag_layout: None,
            labels: None,
        }
    }
}

impl MatrixSettings {
    pub fn commands(&self) -> usize {
        self.rows * self.cols
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub terminal_remote_state: TerminalRemoteState,
    pub decode_poll_interval_ms: u64,
    /// Unset waits for the stimulus app to close forever.
    pub teardown_timeout_ms: Option<u64>,
    pub recording_dir: PathBuf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            terminal_remote_state: TerminalRemoteState::Down,
            decode_poll_interval_ms: DEFAULT_DECODE_POLL_INTERVAL.as_millis() as u64,
            teardown_timeout_ms: None,
            recording_dir: PathBuf::from("recordings"),
        }
    }
}

pub fn settings_path() -> PathBuf {
    std::env::var(SETTINGS_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_FILE))
}

/// Loads the settings file if there is one, then applies `APP__*`
/// environment overrides.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let path = settings_path();
    let mut settings = match fs::read_to_string(&path) {
        Ok(raw) => parse_settings(&path, &raw)?,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no settings file, using defaults");
            Settings::default()
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    apply_env_overrides(&mut settings, |var| std::env::var(var).ok())?;
    Ok(settings)
}

pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_settings(path, &raw)
}

fn parse_settings(path: &Path, raw: &str) -> Result<Settings, ConfigError> {
    toml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(v) = lookup("APP__BIND_ADDR") {
        let addr: SocketAddr = v.parse().map_err(|_| ConfigError::Env {
            var: "APP__BIND_ADDR",
            value: v.clone(),
        })?;
        settings.connection.ip = addr.ip().to_string();
        settings.connection.port = addr.port();
    }
    if let Some(v) = lookup("APP__MODE") {
        settings.run.mode = match v.to_ascii_lowercase().as_str() {
            "train" => Mode::Train,
            "online" => Mode::Online,
            _ => {
                return Err(ConfigError::Env {
                    var: "APP__MODE",
                    value: v,
                })
            }
        };
    }
    if let Some(v) = lookup("APP__STIMULUS_EXE") {
        settings.connection.stimulus_exe = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("APP__RECORDING_DIR") {
        settings.session.recording_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("APP__TERMINAL_REMOTE_STATE") {
        settings.session.terminal_remote_state = match v.to_ascii_lowercase().as_str() {
            "down" => TerminalRemoteState::Down,
            "finished" => TerminalRemoteState::Finished,
            _ => {
                return Err(ConfigError::Env {
                    var: "APP__TERMINAL_REMOTE_STATE",
                    value: v,
                })
            }
        };
    }
    Ok(())
}

/// `floor(i * seq_len / commands)` for every command, row-major.
pub fn default_lags(seq_len: usize, commands: usize) -> Vec<u32> {
    (0..commands)
        .map(|i| (i * seq_len / commands) as u32)
        .collect()
}

/// Rotates `sequence` left by `lag`.
pub fn circular_shift(sequence: &[u8], lag: u32) -> Vec<u8> {
    if sequence.is_empty() {
        return Vec::new();
    }
    let mut shifted = sequence.to_vec();
    shifted.rotate_left(lag as usize % sequence.len());
    shifted
}

impl Settings {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .connection
            .ip
            .parse()
            .map_err(|_| ConfigError::BindAddr(self.connection.ip.clone()))?;
        Ok(SocketAddr::new(ip, self.connection.port))
    }

    /// Checks everything that must hold before a session may start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        self.lags()?;
        self.labels()?;

        if self.run.mode == Mode::Online {
            let path = self.run.model_path.as_ref().ok_or(ConfigError::MissingModel)?;
            if !path.exists() {
                return Err(ConfigError::ModelNotFound(path.clone()));
            }
        }
        if let Some(exe) = &self.connection.stimulus_exe {
            if !exe.exists() {
                return Err(ConfigError::ExecutableNotFound(exe.clone()));
            }
        }
        Ok(())
    }

    pub fn sequence_length(&self) -> Result<usize, ConfigError> {
        let sequence = &self.matrix.base_sequence;
        if sequence.is_empty() {
            return Err(ConfigError::MissingSequence);
        }
        if !SUPPORTED_SEQUENCE_LENGTHS.contains(&sequence.len()) {
            return Err(ConfigError::UnsupportedSequenceLength(sequence.len()));
        }
        if sequence.iter().any(|&bit| bit > 1) {
            return Err(ConfigError::NonBinarySequence);
        }
        Ok(sequence.len())
    }

    /// Lag of every command, row-major.
    pub fn lags(&self) -> Result<Vec<u32>, ConfigError> {
        let commands = self.matrix.commands();
        if commands == 0 {
            return Err(ConfigError::EmptyMatrix);
        }
        let seq_len = self.sequence_length()?;
        if seq_len < commands {
            return Err(ConfigError::NotEnoughLags { seq_len, commands });
        }

        match &self.matrix.lag_layout {
            None => Ok(default_lags(seq_len, commands)),
            Some(layout) => {
                if layout.len() != commands {
                    return Err(ConfigError::LagLayoutSize {
                        expected: commands,
                        found: layout.len(),
                    });
                }
                if let Some(&lag) = layout.iter().find(|&&lag| lag as usize >= seq_len) {
                    return Err(ConfigError::LagOutOfRange { lag, seq_len });
                }
                Ok(layout.clone())
            }
        }
    }

    pub fn labels(&self) -> Result<Vec<String>, ConfigError> {
        let commands = self.matrix.commands();
        match &self.matrix.labels {
            Some(labels) if labels.len() != commands => Err(ConfigError::LabelCount {
                expected: commands,
                found: labels.len(),
            }),
            Some(labels) => Ok(labels.clone()),
            None => Ok(COMMAND_LABELS
                .chars()
                .cycle()
                .take(commands)
                .map(String::from)
                .collect()),
        }
    }

    /// Builds the `setParameters` payload.
    pub fn experiment_parameters(&self) -> Result<ExperimentParameters, ConfigError> {
        let lags = self.lags()?;
        let labels = self.labels()?;
        let cols = self.matrix.cols;

        let item_list = lags
            .iter()
            .zip(labels)
            .enumerate()
            .map(|(idx, (&lag, label))| TargetDescriptor {
                row: (idx / cols) as u32,
                col: (idx % cols) as u32,
                text: label.clone(),
                label,
                sequence: circular_shift(&self.matrix.base_sequence, lag),
                lag,
            })
            .collect();

        Ok(ExperimentParameters {
            mode: self.run.mode,
            train_cycles: self.run.train_cycles,
            train_trials: self.run.train_trials,
            test_cycles: self.run.test_cycles,
            t_prev_text: self.timings.t_prev_text,
            t_prev_iddle: self.timings.t_prev_iddle,
            t_finish_text: self.timings.t_finish_text,
            fps_resolution: self.run.fps_resolution,
            photodiode_enabled: self.run.enable_photodiode,
            matrices: vec![MatrixDescriptor {
                n_row: self.matrix.rows as u32,
                n_col: self.matrix.cols as u32,
                item_list,
            }],
            colors: self.colors.clone(),
        })
    }

    pub fn run_label(&self) -> RunLabel {
        RunLabel {
            user: self.run.user.clone(),
            session: self.run.session.clone(),
            run: self.run.run,
        }
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, ConfigError> {
        Ok(OrchestratorConfig {
            parameters: self.experiment_parameters()?,
            label: self.run_label(),
            terminal_remote_state: self.session.terminal_remote_state,
            decode_poll_interval: Duration::from_millis(self.session.decode_poll_interval_ms.max(1)),
            teardown_timeout: self.session.teardown_timeout_ms.map(Duration::from_millis),
        })
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
