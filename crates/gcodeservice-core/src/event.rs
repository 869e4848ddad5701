//! Service event types
//!
//! Every notification the engine publishes to its subscriber is a
//! [`ServiceEvent`]. Each variant has a stable wire name (see
//! [`ServiceEvent::name`]) matching what remote job pushers and monitors
//! key their handlers on, e.g. `temp_change:ext` or `gcode_action:heating`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// File stream state transitions reported through `state_change`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateChange {
    /// Streaming was paused
    Paused,
    /// Streaming resumed after a pause
    Resumed,
    /// Streaming was aborted or killed
    Aborted,
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused => write!(f, "paused"),
            Self::Resumed => write!(f, "resumed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Which heater a temperature report concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempChannel {
    /// Extruder only
    Ext,
    /// Heated bed only
    Bed,
    /// Extruder and bed together
    All,
}

impl fmt::Display for TempChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ext => write!(f, "ext"),
            Self::Bed => write!(f, "bed"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Temperatures parsed from a firmware status line
///
/// Fields are `None` when the corresponding token was absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Current extruder temperature
    pub extruder: Option<f64>,
    /// Extruder target temperature
    pub extruder_target: Option<f64>,
    /// Current bed temperature
    pub bed: Option<f64>,
    /// Bed target temperature
    pub bed_target: Option<f64>,
}

impl TemperatureReading {
    /// True when no temperature token was found
    pub fn is_empty(&self) -> bool {
        self.extruder.is_none() && self.bed.is_none()
    }
}

/// Category of a semantically meaningful outgoing command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Spindle, laser and unconditional stop codes
    Milling,
    /// Heater set/wait codes
    Heating,
    /// Fan codes
    Cooling,
    /// Speed and flow factor codes
    Printing,
    /// Camera, scanning laser and probing codes
    Scanning,
    /// Display message
    Message,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Milling => write!(f, "milling"),
            Self::Heating => write!(f, "heating"),
            Self::Cooling => write!(f, "cooling"),
            Self::Printing => write!(f, "printing"),
            Self::Scanning => write!(f, "scanning"),
            Self::Message => write!(f, "message"),
        }
    }
}

/// An outgoing command recognised as a machine action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcodeAction {
    /// Action category
    pub kind: ActionKind,
    /// Command code, e.g. `M109`
    pub code: String,
    /// The `S` parameter when present and numeric
    pub value: Option<f64>,
    /// Display text for `M117`
    pub message: Option<String>,
}

/// Attributes of a comment line in a streamed job file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentInfo {
    /// 1-based line number within the job file
    pub line_number: usize,
    /// Comment text without the leading `;` or parentheses
    pub text: String,
    /// Layer number announced by the comment, if any
    pub layer: Option<u32>,
}

/// Named firmware error conditions reported through `ERROR:<code>` lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareErrorKind {
    /// Machine was killed (100)
    Killed,
    /// Machine was stopped (101)
    Stopped,
    /// Safety door opened (102)
    DoorOpen,
    /// Heater below minimum temperature (103)
    MinTemp,
    /// Heater above maximum temperature (104)
    MaxTemp,
    /// Bed above maximum temperature (105)
    MaxBedTemp,
    /// X max endstop triggered (106)
    XMaxEndstop,
    /// X min endstop triggered (107)
    XMinEndstop,
    /// Y max endstop triggered (108)
    YMaxEndstop,
    /// Y min endstop triggered (109)
    YMinEndstop,
    /// Idle safety timeout (110)
    IdleSafety,
    /// Both Y endstops triggered (120)
    YBothTriggered,
    /// Both Z endstops triggered (121)
    ZBothTriggered,
    /// Code not present in the table
    Unknown(String),
}

impl fmt::Display for FirmwareErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Killed => write!(f, "ERROR_KILLED"),
            Self::Stopped => write!(f, "ERROR_STOPPED"),
            Self::DoorOpen => write!(f, "ERROR_DOOR_OPEN"),
            Self::MinTemp => write!(f, "ERROR_MIN_TEMP"),
            Self::MaxTemp => write!(f, "ERROR_MAX_TEMP"),
            Self::MaxBedTemp => write!(f, "ERROR_MAX_BED_TEMP"),
            Self::XMaxEndstop => write!(f, "ERROR_X_MAX_ENDSTOP"),
            Self::XMinEndstop => write!(f, "ERROR_X_MIN_ENDSTOP"),
            Self::YMaxEndstop => write!(f, "ERROR_Y_MAX_ENDSTOP"),
            Self::YMinEndstop => write!(f, "ERROR_Y_MIN_ENDSTOP"),
            Self::IdleSafety => write!(f, "ERROR_IDLE_SAFETY"),
            Self::YBothTriggered => write!(f, "ERROR_Y_BOTH_TRIGGERED"),
            Self::ZBothTriggered => write!(f, "ERROR_Z_BOTH_TRIGGERED"),
            Self::Unknown(code) => write!(f, "unknown error: {}", code),
        }
    }
}

/// Events delivered to the registered subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServiceEvent {
    /// The last command of a streamed file was acknowledged (or the stream aborted)
    FileDone,
    /// The first motion command of a file was sent
    FirstMove,
    /// Pause/resume/abort of a file stream
    StateChange(StateChange),
    /// Temperature extracted from an intermediate status line
    TempChange {
        /// Heater the report concerns
        channel: TempChannel,
        /// Parsed values
        reading: TemperatureReading,
    },
    /// Outgoing command recognised by the action hooks
    GcodeAction(GcodeAction),
    /// Comment line encountered while streaming
    ProcessComment(CommentInfo),
    /// `ERROR:<code>` line received from the firmware
    FirmwareError {
        /// Raw code token
        code: String,
        /// Decoded condition
        kind: FirmwareErrorKind,
    },
    /// A job file could not be opened
    FileError {
        /// Requested path
        path: String,
        /// Why it failed
        reason: String,
    },
    /// The transport failed and both workers are terminating
    TransportError(String),
}

impl ServiceEvent {
    /// Wire name of this event as seen by callback handlers
    pub fn name(&self) -> String {
        match self {
            Self::FileDone => "file_done".to_string(),
            Self::FirstMove => "first_move".to_string(),
            Self::StateChange(_) => "state_change".to_string(),
            Self::TempChange { channel, .. } => format!("temp_change:{}", channel),
            Self::GcodeAction(action) => format!("gcode_action:{}", action.kind),
            Self::ProcessComment(_) => "process_comment".to_string(),
            Self::FirmwareError { .. } => "firmware_error".to_string(),
            Self::FileError { .. } => "file_error".to_string(),
            Self::TransportError(_) => "transport_error".to_string(),
        }
    }

    /// Event payload as JSON, for layers that forward `(name, data)` pairs
    pub fn data(&self) -> serde_json::Value {
        match self {
            Self::FileDone | Self::FirstMove => serde_json::Value::Null,
            Self::StateChange(change) => serde_json::Value::String(change.to_string()),
            Self::TempChange { reading, .. } => serde_json::to_value(reading).unwrap_or_default(),
            Self::GcodeAction(action) => serde_json::to_value(action).unwrap_or_default(),
            Self::ProcessComment(info) => serde_json::to_value(info).unwrap_or_default(),
            Self::FirmwareError { code, kind } => serde_json::json!({
                "code": code,
                "category": kind.to_string(),
            }),
            Self::FileError { path, reason } => serde_json::json!({
                "path": path,
                "reason": reason,
            }),
            Self::TransportError(reason) => serde_json::Value::String(reason.clone()),
        }
    }
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateChange(change) => write!(f, "state_change:{}", change),
            Self::FirmwareError { code, kind } => write!(f, "firmware_error {} ({})", code, kind),
            Self::TransportError(reason) => write!(f, "transport_error: {}", reason),
            other => write!(f, "{}", other.name()),
        }
    }
}
