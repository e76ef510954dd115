use axum::extract::ws::Message;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::state::ApplicationState;

/// Wire framing shared by both directions: `{"event": name, "data": payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HeartbeatPayload {
    /// Merged only when it is an object; anything else still counts as a
    /// heartbeat.
    #[serde(default)]
    pub state: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SatelliteSelection {
    #[serde(default)]
    pub satellite: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransponderSelection {
    #[serde(default)]
    pub transponder: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubtoneSelection {
    #[serde(default)]
    pub subtone: Option<Value>,
}

/// Browsers send the offset as a number or a numeric string; the controller
/// parses it, so the value is relayed as given.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RxOffset {
    #[serde(default)]
    pub offset: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SatelliteCatalogUpdate {
    #[serde(default)]
    pub satellites: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransponderCatalogUpdate {
    #[serde(default)]
    pub satellite: Option<String>,
    #[serde(default)]
    pub transponders: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransponderQuery {
    #[serde(default)]
    pub satellite: Option<String>,
}

/// Every event a client may send to the hub, validated once at the socket
/// boundary. Optional fields stay optional here; the dispatcher decides
/// whether an absent field means "ignore".
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    RegisterController,
    Heartbeat(HeartbeatPayload),
    StartTracking,
    StopTracking,
    SelectSatellite(SatelliteSelection),
    SelectTransponder(TransponderSelection),
    SetSubtone(SubtoneSelection),
    SetRxOffset(RxOffset),
    ParkRotator,
    StopRotator,
    PauseFrequencyUpdates,
    ResumeFrequencyUpdates,
    UpdateSatelliteList(SatelliteCatalogUpdate),
    UpdateTransponderList(TransponderCatalogUpdate),
    GetStatus,
    GetSatelliteList,
    GetTransponderList(TransponderQuery),
    StartAudioTx,
    StopAudioTx,
    AudioData(Value),
    MuteTx,
    UnmuteTx,
    AudioTxStatus(Value),
    AudioError(Value),
    RxAudioData(Value),
}

impl ClientEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Json)?;
        Self::from_envelope(envelope)
    }

    pub fn decode_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_slice(bytes).map_err(ProtocolError::Json)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let Envelope { event, data } = envelope;
        let decoded = match event.as_str() {
            "register_qtrig_client" => ClientEvent::RegisterController,
            "heartbeat" => ClientEvent::Heartbeat(payload("heartbeat", data)?),
            "start_tracking" => ClientEvent::StartTracking,
            "stop_tracking" => ClientEvent::StopTracking,
            "select_satellite" => ClientEvent::SelectSatellite(payload("select_satellite", data)?),
            "select_transponder" => {
                ClientEvent::SelectTransponder(payload("select_transponder", data)?)
            }
            "set_subtone" => ClientEvent::SetSubtone(payload("set_subtone", data)?),
            "set_rx_offset" => ClientEvent::SetRxOffset(payload("set_rx_offset", data)?),
            "park_rotator" => ClientEvent::ParkRotator,
            "stop_rotator" => ClientEvent::StopRotator,
            "pause_frequency_updates" => ClientEvent::PauseFrequencyUpdates,
            "resume_frequency_updates" => ClientEvent::ResumeFrequencyUpdates,
            "update_satellite_list" => {
                ClientEvent::UpdateSatelliteList(payload("update_satellite_list", data)?)
            }
            "update_transponder_list" => {
                ClientEvent::UpdateTransponderList(payload("update_transponder_list", data)?)
            }
            "get_status" => ClientEvent::GetStatus,
            "get_satellite_list" => ClientEvent::GetSatelliteList,
            "get_transponder_list" => {
                ClientEvent::GetTransponderList(payload("get_transponder_list", data)?)
            }
            "start_audio_tx" => ClientEvent::StartAudioTx,
            "stop_audio_tx" => ClientEvent::StopAudioTx,
            "audio_data" => ClientEvent::AudioData(data),
            "mute_tx" => ClientEvent::MuteTx,
            "unmute_tx" => ClientEvent::UnmuteTx,
            "audio_tx_status" => ClientEvent::AudioTxStatus(data),
            "audio_error" => ClientEvent::AudioError(data),
            "rx_audio_data" => ClientEvent::RxAudioData(data),
            _ => return Err(ProtocolError::UnknownEvent(event)),
        };
        Ok(decoded)
    }

    /// Wire name of the event, used as a metric label.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RegisterController => "register_qtrig_client",
            ClientEvent::Heartbeat(_) => "heartbeat",
            ClientEvent::StartTracking => "start_tracking",
            ClientEvent::StopTracking => "stop_tracking",
            ClientEvent::SelectSatellite(_) => "select_satellite",
            ClientEvent::SelectTransponder(_) => "select_transponder",
            ClientEvent::SetSubtone(_) => "set_subtone",
            ClientEvent::SetRxOffset(_) => "set_rx_offset",
            ClientEvent::ParkRotator => "park_rotator",
            ClientEvent::StopRotator => "stop_rotator",
            ClientEvent::PauseFrequencyUpdates => "pause_frequency_updates",
            ClientEvent::ResumeFrequencyUpdates => "resume_frequency_updates",
            ClientEvent::UpdateSatelliteList(_) => "update_satellite_list",
            ClientEvent::UpdateTransponderList(_) => "update_transponder_list",
            ClientEvent::GetStatus => "get_status",
            ClientEvent::GetSatelliteList => "get_satellite_list",
            ClientEvent::GetTransponderList(_) => "get_transponder_list",
            ClientEvent::StartAudioTx => "start_audio_tx",
            ClientEvent::StopAudioTx => "stop_audio_tx",
            ClientEvent::AudioData(_) => "audio_data",
            ClientEvent::MuteTx => "mute_tx",
            ClientEvent::UnmuteTx => "unmute_tx",
            ClientEvent::AudioTxStatus(_) => "audio_tx_status",
            ClientEvent::AudioError(_) => "audio_error",
            ClientEvent::RxAudioData(_) => "rx_audio_data",
        }
    }
}

// Payload-less senders often emit `{}` or nothing at all; both mean "all
// fields absent".
fn payload<T>(event: &'static str, data: Value) -> Result<T, ProtocolError>
where
    T: DeserializeOwned + Default,
{
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload { event, source })
}

/// Events the hub emits, both to observers and as `cmd_*` commands to the
/// controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Status(ApplicationState),
    SatelliteList {
        satellites: Vec<Value>,
        current: Option<String>,
    },
    TransponderList {
        satellite: Option<String>,
        transponders: Vec<Value>,
        current: Option<String>,
    },
    RegistrationSuccess {
        status: &'static str,
    },
    AudioTxStatus(Value),
    AudioError(Value),
    RxAudioData(Value),

    CmdStartTracking,
    CmdStopTracking,
    CmdSelectSatellite {
        satellite: String,
    },
    CmdSelectTransponder {
        transponder: String,
    },
    CmdSetSubtone {
        subtone: Value,
    },
    CmdSetRxOffset {
        offset: Value,
    },
    CmdParkRotator,
    CmdStopRotator,
    CmdPauseFrequencyUpdates,
    CmdResumeFrequencyUpdates,
    CmdGetTransponderList {
        satellite: String,
    },
    CmdStartAudioTx,
    CmdStopAudioTx,
    CmdAudioData(Value),
    CmdMuteTx,
    CmdUnmuteTx,
}

impl ServerEvent {
    pub fn registration_success() -> Self {
        ServerEvent::RegistrationSuccess { status: "success" }
    }

    /// Rejection sent to a single observer whose audio request failed.
    pub fn audio_rejected(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::AudioError(serde_json::json!({
            "error": code,
            "message": message.into(),
        }))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Status(_) => "status",
            ServerEvent::SatelliteList { .. } => "satellite_list",
            ServerEvent::TransponderList { .. } => "transponder_list",
            ServerEvent::RegistrationSuccess { .. } => "registration_success",
            ServerEvent::AudioTxStatus(_) => "audio_tx_status",
            ServerEvent::AudioError(_) => "audio_error",
            ServerEvent::RxAudioData(_) => "rx_audio_data",
            ServerEvent::CmdStartTracking => "cmd_start_tracking",
            ServerEvent::CmdStopTracking => "cmd_stop_tracking",
            ServerEvent::CmdSelectSatellite { .. } => "cmd_select_satellite",
            ServerEvent::CmdSelectTransponder { .. } => "cmd_select_transponder",
            ServerEvent::CmdSetSubtone { .. } => "cmd_set_subtone",
            ServerEvent::CmdSetRxOffset { .. } => "cmd_set_rx_offset",
            ServerEvent::CmdParkRotator => "cmd_park_rotator",
            ServerEvent::CmdStopRotator => "cmd_stop_rotator",
            ServerEvent::CmdPauseFrequencyUpdates => "cmd_pause_frequency_updates",
            ServerEvent::CmdResumeFrequencyUpdates => "cmd_resume_frequency_updates",
            ServerEvent::CmdGetTransponderList { .. } => "cmd_get_transponder_list",
            ServerEvent::CmdStartAudioTx => "cmd_start_audio_tx",
            ServerEvent::CmdStopAudioTx => "cmd_stop_audio_tx",
            ServerEvent::CmdAudioData(_) => "cmd_audio_data",
            ServerEvent::CmdMuteTx => "cmd_mute_tx",
            ServerEvent::CmdUnmuteTx => "cmd_unmute_tx",
        }
    }

    pub fn to_frame(&self) -> Result<Message, serde_json::Error> {
        serde_json::to_string(self).map(Message::Text)
    }
}
