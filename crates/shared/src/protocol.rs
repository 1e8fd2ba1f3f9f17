//! Wire vocabulary exchanged with the stimulus application.
//!
//! Every message is a JSON object keyed by an `event_type` discriminator.
//! Inbound messages are decoded into [`ExperimentEvent`]; outbound commands
//! are serialized from [`OutboundCommand`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{Mode, SelectionCoords, TrialRecord},
    error::ProtocolError,
};

pub const EVENT_TYPE_FIELD: &str = "event_type";

/// Raster latency update reported by the stimulus application after a resize.
/// Fields beyond the known ones are kept as sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize_onset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_size: Option<Vec<f64>>,
    #[serde(default)]
    pub new_position: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct OnsetPayload {
    cycle: u32,
    onset: f64,
    trial: u32,
    matrix_idx: u32,
    level_idx: u32,
    unit_idx: u32,
    #[serde(default)]
    command_idx: Option<u32>,
    #[serde(default)]
    target: Option<String>,
}

impl OnsetPayload {
    fn into_record(self) -> TrialRecord {
        TrialRecord {
            cycle: self.cycle,
            onset: self.onset,
            trial: self.trial,
            matrix_idx: self.matrix_idx,
            level_idx: self.level_idx,
            unit_idx: self.unit_idx,
            command_idx: self.command_idx,
            target: self.target,
            received_at: Utc::now(),
        }
    }
}

/// Semantic view of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ExperimentEvent {
    Waiting,
    Ready,
    Closed,
    Finished,
    Onset(TrialRecord),
    ResizeInfo(ResizeInfo),
    TrainModelRequest,
    ProcessRequest,
    Unknown(String),
}

impl ExperimentEvent {
    /// Decodes a raw JSON message. A missing discriminator is an error; an
    /// unrecognised one yields [`ExperimentEvent::Unknown`].
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(mut value: Value) -> Result<Self, ProtocolError> {
        let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
        let event_type = object
            .get(EVENT_TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingEventType)?
            .to_string();

        let event = match event_type.as_str() {
            "waiting" => Self::Waiting,
            "ready" => Self::Ready,
            "close" => Self::Closed,
            "finish" => Self::Finished,
            "train" | "test" => {
                let payload: OnsetPayload = serde_json::from_value(value).map_err(|source| {
                    ProtocolError::InvalidPayload {
                        event_type: event_type.clone(),
                        source,
                    }
                })?;
                Self::Onset(payload.into_record())
            }
            "resize" => {
                if let Value::Object(fields) = &mut value {
                    fields.remove(EVENT_TYPE_FIELD);
                }
                let info: ResizeInfo = serde_json::from_value(value).map_err(|source| {
                    ProtocolError::InvalidPayload {
                        event_type: event_type.clone(),
                        source,
                    }
                })?;
                Self::ResizeInfo(info)
            }
            "trainModelPlease" => Self::TrainModelRequest,
            "processPlease" => Self::ProcessRequest,
            _ => Self::Unknown(event_type),
        };
        Ok(event)
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::Closed => "close",
            Self::Finished => "finish",
            Self::Onset(_) => "onset",
            Self::ResizeInfo(_) => "resize",
            Self::TrainModelRequest => "trainModelPlease",
            Self::ProcessRequest => "processPlease",
            Self::Unknown(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorScheme {
    pub color_background: String,
    pub color_target_box: String,
    pub color_highlight_result_box: String,
    pub color_result_info_box: String,
    pub color_result_info_label: String,
    pub color_result_info_text: String,
    pub color_fps_good: String,
    pub color_fps_bad: String,
    pub color_box_0: String,
    pub color_box_1: String,
    pub color_text_0: String,
    pub color_text_1: String,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            color_background: "#a3bec7".into(),
            color_target_box: "#ff195bff".into(),
            color_highlight_result_box: "#03fc5aff".into(),
            color_result_info_box: "#8c8c8cff".into(),
            color_result_info_label: "#b7b7b7ff".into(),
            color_result_info_text: "#f4f657ff".into(),
            color_fps_good: "#5ee57dff".into(),
            color_fps_bad: "#b43228ff".into(),
            color_box_0: "#000000".into(),
            color_box_1: "#ffffff".into(),
            color_text_0: "#ffffff".into(),
            color_text_1: "#000000".into(),
        }
    }
}

/// One selectable command and the code it flickers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub row: u32,
    pub col: u32,
    pub text: String,
    pub label: String,
    pub sequence: Vec<u8>,
    pub lag: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixDescriptor {
    pub n_row: u32,
    pub n_col: u32,
    pub item_list: Vec<TargetDescriptor>,
}

/// Full configuration payload of the `setParameters` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentParameters {
    pub mode: Mode,
    pub train_cycles: u32,
    pub train_trials: u32,
    pub test_cycles: u32,
    pub t_prev_text: f64,
    pub t_prev_iddle: f64,
    pub t_finish_text: f64,
    pub fps_resolution: f64,
    pub photodiode_enabled: bool,
    pub matrices: Vec<MatrixDescriptor>,
    #[serde(flatten)]
    pub colors: ColorScheme,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "camelCase")]
pub enum OutboundCommand {
    SetParameters(ExperimentParameters),
    Play,
    Pause,
    Resume,
    Stop,
    Selection { selection_coords: [u32; 3] },
    ModelTrained,
    Exception { exception: String },
}

impl OutboundCommand {
    pub fn selection(coords: SelectionCoords) -> Self {
        Self::Selection {
            selection_coords: coords.to_wire(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetParameters(_) => "setParameters",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Selection { .. } => "selection",
            Self::ModelTrained => "modelTrained",
            Self::Exception { .. } => "exception",
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
