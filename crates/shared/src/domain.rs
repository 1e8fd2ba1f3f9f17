use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::ResizeInfo;

/// Lifecycle of the local transport server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    #[default]
    Down,
    Up,
}

/// Lifecycle of the remote stimulus application as reported over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteAppState {
    #[default]
    Down,
    Up,
    Ready,
    Finished,
}

/// Top-level experiment phase owned by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    NotReady,
    Ready,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Train,
    Online,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Train => "Train",
            Mode::Online => "Online",
        }
    }
}

/// Metadata of one stimulation onset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub cycle: u32,
    pub onset: f64,
    pub trial: u32,
    pub matrix_idx: u32,
    pub level_idx: u32,
    pub unit_idx: u32,
    /// Only reported in train mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_idx: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Append-only, insertion-ordered accumulator of trial metadata.
///
/// Entries are never deduplicated or reordered; a redelivered onset is
/// stored twice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialLog {
    records: Vec<TrialRecord>,
}

impl TrialLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: TrialRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrialRecord> {
        self.records.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionCoords {
    pub matrix: u32,
    pub row: u32,
    pub col: u32,
}

impl SelectionCoords {
    pub fn to_wire(self) -> [u32; 3] {
        [self.matrix, self.row, self.col]
    }
}

/// Result of decoding one trial: the most probable command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub coords: SelectionCoords,
    pub label: String,
}

/// Subject and run the recording belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunLabel {
    pub user: String,
    pub session: String,
    pub run: u32,
}

impl Default for RunLabel {
    fn default() -> Self {
        Self {
            user: "S0X".into(),
            session: "Train".into(),
            run: 1,
        }
    }
}

/// Everything collected during one session, handed to persistence at teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub mode: Mode,
    #[serde(default)]
    pub label: RunLabel,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub trials: TrialLog,
    #[serde(default)]
    pub resizes: Vec<ResizeInfo>,
    #[serde(default)]
    pub selections: Vec<Selection>,
}

impl SessionRecord {
    pub fn new(mode: Mode, label: RunLabel) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            mode,
            label,
            started_at: Utc::now(),
            finished_at: None,
            trials: TrialLog::new(),
            resizes: Vec::new(),
            selections: Vec::new(),
        }
    }
}
