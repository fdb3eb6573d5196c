// ── Command API ──
//
// All write operations flow through a unified `Command` enum, routed over
// an mpsc channel to the session event loop. Each RPC-backed variant maps
// to its remote method name and parameter shape through `wire()` -- pure,
// stateless formatting; the method catalog itself is an external contract.

use serde_json::{Map, Value, json};
use tokio::sync::oneshot;

use corelink_proto::EngineStatus;

use crate::error::CoreError;
use crate::model::{ControlState, ControlValue};

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: oneshot::Sender<Result<CommandReply, CoreError>>,
}

/// One value applied to a control inside a component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentValue {
    pub name: String,
    pub value: ControlValue,
    pub ramp: Option<f64>,
}

/// All operations a consumer can submit to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ── Controls ─────────────────────────────────────────────────────
    SetControl {
        name: String,
        value: ControlValue,
        ramp: Option<f64>,
    },
    /// Relative adjustment: read-modify-write against the cached value.
    AdjustControl {
        name: String,
        delta: f64,
        ramp: Option<f64>,
    },
    /// Explicit fetch; results are ingested into the value cache exactly
    /// like poll deltas.
    GetControls {
        names: Vec<String>,
    },
    SetComponentControls {
        component: String,
        controls: Vec<ComponentValue>,
    },

    // ── Mixer ────────────────────────────────────────────────────────
    SetCrossPointGain {
        mixer: String,
        inputs: String,
        outputs: String,
        gain_db: f64,
        ramp: Option<f64>,
    },
    SetCrossPointMute {
        mixer: String,
        inputs: String,
        outputs: String,
        mute: bool,
    },
    SetInputGain {
        mixer: String,
        inputs: String,
        gain_db: f64,
        ramp: Option<f64>,
    },
    SetInputMute {
        mixer: String,
        inputs: String,
        mute: bool,
    },
    SetOutputGain {
        mixer: String,
        outputs: String,
        gain_db: f64,
        ramp: Option<f64>,
    },
    SetOutputMute {
        mixer: String,
        outputs: String,
        mute: bool,
    },

    // ── Media playback ───────────────────────────────────────────────
    LoopPlayerStart {
        player: String,
        files: Vec<String>,
        outputs: Vec<u32>,
        start_at_seconds: f64,
        looped: bool,
    },
    LoopPlayerStop {
        player: String,
        outputs: Vec<u32>,
    },
    LoopPlayerCancel {
        player: String,
        outputs: Vec<u32>,
    },

    // ── Snapshots ────────────────────────────────────────────────────
    LoadSnapshot {
        bank: String,
        number: u32,
        ramp: Option<f64>,
    },
    SaveSnapshot {
        bank: String,
        number: u32,
    },

    // ── Paging ───────────────────────────────────────────────────────
    SubmitPage {
        zones: Vec<u32>,
        priority: u32,
        message: String,
        preamble: Option<String>,
    },
    StopPage {
        page_id: String,
    },

    // ── Change groups ────────────────────────────────────────────────
    AddControls {
        group: String,
        names: Vec<String>,
    },
    AddComponentControls {
        group: String,
        component: String,
        names: Vec<String>,
    },
    RemoveControls {
        group: String,
        names: Vec<String>,
    },
    DestroyGroup {
        group: String,
    },
    InvalidateGroup {
        group: String,
    },
    ClearGroup {
        group: String,
    },

    // ── Session ──────────────────────────────────────────────────────
    /// Report the engine status of every configured core as currently
    /// known to the coordinator. Answered locally, no wire traffic.
    Status,
}

/// Result of an executed command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    /// The core accepted the command.
    Ack,
    /// Fetched control states (already ingested into the cache).
    Values(Vec<ControlState>),
    /// Per-core engine status.
    Status {
        primary: EngineStatus,
        secondary: Option<EngineStatus>,
    },
}

fn with_ramp(mut params: Map<String, Value>, ramp: Option<f64>) -> Value {
    if let Some(ramp) = ramp {
        params.insert("Ramp".into(), json!(ramp));
    }
    Value::Object(params)
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl Command {
    /// Remote method name and parameter shape for RPC-backed commands.
    ///
    /// Returns `None` for commands the session answers locally or resolves
    /// first (change-group bookkeeping, `Status`, `AdjustControl`).
    pub(crate) fn wire(&self) -> Option<(&'static str, Value)> {
        match self {
            Self::SetControl { name, value, ramp } => Some((
                "Control.Set",
                with_ramp(object(json!({"Name": name, "Value": value})), *ramp),
            )),
            Self::GetControls { names } => Some(("Control.Get", json!(names))),
            Self::SetComponentControls { component, controls } => {
                let controls: Vec<Value> = controls
                    .iter()
                    .map(|c| with_ramp(object(json!({"Name": c.name, "Value": c.value})), c.ramp))
                    .collect();
                Some(("Component.Set", json!({"Name": component, "Controls": controls})))
            }

            Self::SetCrossPointGain { mixer, inputs, outputs, gain_db, ramp } => Some((
                "Mixer.SetCrossPointGain",
                with_ramp(
                    object(json!({
                        "Name": mixer, "Inputs": inputs, "Outputs": outputs, "Value": gain_db,
                    })),
                    *ramp,
                ),
            )),
            Self::SetCrossPointMute { mixer, inputs, outputs, mute } => Some((
                "Mixer.SetCrossPointMute",
                json!({"Name": mixer, "Inputs": inputs, "Outputs": outputs, "Value": mute}),
            )),
            Self::SetInputGain { mixer, inputs, gain_db, ramp } => Some((
                "Mixer.SetInputGain",
                with_ramp(object(json!({"Name": mixer, "Inputs": inputs, "Value": gain_db})), *ramp),
            )),
            Self::SetInputMute { mixer, inputs, mute } => Some((
                "Mixer.SetInputMute",
                json!({"Name": mixer, "Inputs": inputs, "Value": mute}),
            )),
            Self::SetOutputGain { mixer, outputs, gain_db, ramp } => Some((
                "Mixer.SetOutputGain",
                with_ramp(object(json!({"Name": mixer, "Outputs": outputs, "Value": gain_db})), *ramp),
            )),
            Self::SetOutputMute { mixer, outputs, mute } => Some((
                "Mixer.SetOutputMute",
                json!({"Name": mixer, "Outputs": outputs, "Value": mute}),
            )),

            Self::LoopPlayerStart { player, files, outputs, start_at_seconds, looped } => Some((
                "LoopPlayer.Start",
                json!({
                    "Name": player,
                    "Files": files,
                    "Outputs": outputs,
                    "StartTime": start_at_seconds,
                    "Loop": looped,
                }),
            )),
            Self::LoopPlayerStop { player, outputs } => {
                Some(("LoopPlayer.Stop", json!({"Name": player, "Outputs": outputs})))
            }
            Self::LoopPlayerCancel { player, outputs } => {
                Some(("LoopPlayer.Cancel", json!({"Name": player, "Outputs": outputs})))
            }

            Self::LoadSnapshot { bank, number, ramp } => Some((
                "Snapshot.Load",
                with_ramp(object(json!({"Name": bank, "Bank": number})), *ramp),
            )),
            Self::SaveSnapshot { bank, number } => {
                Some(("Snapshot.Save", json!({"Name": bank, "Bank": number})))
            }

            Self::SubmitPage { zones, priority, message, preamble } => {
                let mut params = object(json!({
                    "Zones": zones, "Priority": priority, "Message": message,
                }));
                if let Some(preamble) = preamble {
                    params.insert("Preamble".into(), json!(preamble));
                }
                Some(("PA.PageSubmit", Value::Object(params)))
            }
            Self::StopPage { page_id } => Some(("PA.PageStop", json!({"PageId": page_id}))),

            Self::AdjustControl { .. }
            | Self::AddControls { .. }
            | Self::AddComponentControls { .. }
            | Self::RemoveControls { .. }
            | Self::DestroyGroup { .. }
            | Self::InvalidateGroup { .. }
            | Self::ClearGroup { .. }
            | Self::Status => None,
        }
    }
}
