use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::AudioArbiter;
use crate::error::RelayError;
use crate::liveness::LivenessMonitor;
use crate::protocol::{
    ClientEvent, RxOffset, SatelliteCatalogUpdate, SatelliteSelection, ServerEvent,
    SubtoneSelection, TransponderCatalogUpdate, TransponderQuery, TransponderSelection,
};
use crate::registry::{ConnectionId, ConnectionRegistry, Role};
use crate::state::StateStore;

/// All mutable hub state. Only reachable through [`Hub`], which keeps it
/// behind one lock so each decision and the write it leads to are atomic.
#[derive(Default)]
struct HubState {
    registry: ConnectionRegistry,
    store: StateStore,
    audio: AudioArbiter,
    liveness: LivenessMonitor,
}

struct HubInner {
    state: Mutex<HubState>,
    started_at: Instant,
}

/// Cheap, cloneable handle to the relay engine.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub status: &'static str,
    pub uptime_seconds: f64,
    pub qtrig_connected: bool,
    pub clients: usize,
}

impl Hub {
    pub fn new(liveness_threshold: Duration) -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState {
                    liveness: LivenessMonitor::new(liveness_threshold),
                    ..HubState::default()
                }),
                started_at: Instant::now(),
            }),
        }
    }

    /// Registers a new observer and greets it with the cached snapshots.
    pub fn connect(&self, sender: mpsc::Sender<Message>) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        let mut guard = self.inner.state.lock();
        let HubState {
            registry, store, ..
        } = &mut *guard;

        registry.register(connection_id, sender);
        counter!("qtrig_hub_connections_total", 1);
        gauge!("qtrig_hub_connections_active", registry.len() as f64);

        reply(
            registry,
            connection_id,
            ServerEvent::Status(store.snapshot().clone()),
        );
        if !store.satellite_catalog().is_empty() {
            reply(registry, connection_id, satellite_list(store));
        }
        if let Some((satellite, transponders)) = store.current_transponders() {
            let greeting = ServerEvent::TransponderList {
                satellite: Some(satellite.to_string()),
                transponders: transponders.to_vec(),
                current: store.snapshot().transponder.clone(),
            };
            reply(registry, connection_id, greeting);
        }

        info!(
            connection_id = %connection_id,
            clients = registry.len(),
            "client connected"
        );
        connection_id
    }

    /// Drops the connection and releases everything it held. Runs to
    /// completion before the next event is dispatched.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        let mut guard = self.inner.state.lock();
        let HubState {
            registry, audio, ..
        } = &mut *guard;

        let Some(role) = registry.unregister(connection_id) else {
            return;
        };
        if role == Role::Controller {
            warn!(connection_id = %connection_id, "controller disconnected");
        }

        match audio.on_owner_disconnect(connection_id, registry) {
            Ok(true) => {
                counter!("qtrig_hub_audio_sessions_released_total", 1, "reason" => "disconnect");
                info!(connection_id = %connection_id, "audio session released on disconnect");
            }
            Ok(false) => {}
            Err(err) => {
                counter!("qtrig_hub_audio_sessions_released_total", 1, "reason" => "disconnect");
                debug!(
                    connection_id = %connection_id,
                    error = %err,
                    "audio session released; stop command not delivered"
                );
            }
        }

        gauge!("qtrig_hub_connections_active", registry.len() as f64);
        info!(
            connection_id = %connection_id,
            clients = registry.len(),
            "client disconnected"
        );
    }

    pub fn dispatch(&self, connection_id: ConnectionId, event: ClientEvent) {
        counter!("qtrig_hub_events_received_total", 1, "event" => event.name());

        let mut guard = self.inner.state.lock();
        let HubState {
            registry,
            store,
            audio,
            liveness,
        } = &mut *guard;

        match event {
            ClientEvent::RegisterController => match registry.register_controller(connection_id) {
                Ok(previous) => {
                    if let Some(previous) = previous {
                        warn!(
                            previous = %previous,
                            connection_id = %connection_id,
                            "controller role taken over by a new connection"
                        );
                    }
                    info!(connection_id = %connection_id, "controller registered");
                    reply(registry, connection_id, ServerEvent::registration_success());
                }
                Err(err) => warn!(error = %err, "controller registration rejected"),
            },

            ClientEvent::Heartbeat(heartbeat) => {
                if !from_controller(registry, connection_id, "heartbeat") {
                    return;
                }
                liveness.record_heartbeat();
                match heartbeat.state {
                    Some(Value::Object(update)) => {
                        let rejected = store.apply_merge(update);
                        if !rejected.is_empty() {
                            debug!(keys = ?rejected, "heartbeat carried mistyped state fields");
                        }
                        fan_out(registry, ServerEvent::Status(store.snapshot().clone()));
                    }
                    None => {}
                    Some(other) => debug!(state = %other, "heartbeat state is not an object"),
                }
            }

            ClientEvent::StartTracking => forward(registry, ServerEvent::CmdStartTracking),
            ClientEvent::StopTracking => forward(registry, ServerEvent::CmdStopTracking),
            ClientEvent::SelectSatellite(SatelliteSelection { satellite }) => {
                if let Some(satellite) = non_empty(satellite) {
                    forward(registry, ServerEvent::CmdSelectSatellite { satellite });
                }
            }
            ClientEvent::SelectTransponder(TransponderSelection { transponder }) => {
                if let Some(transponder) = non_empty(transponder) {
                    forward(registry, ServerEvent::CmdSelectTransponder { transponder });
                }
            }
            ClientEvent::SetSubtone(SubtoneSelection { subtone }) => {
                if let Some(subtone) = subtone {
                    forward(registry, ServerEvent::CmdSetSubtone { subtone });
                }
            }
            ClientEvent::SetRxOffset(RxOffset { offset }) => {
                if let Some(offset) = offset {
                    forward(registry, ServerEvent::CmdSetRxOffset { offset });
                }
            }
            ClientEvent::ParkRotator => forward(registry, ServerEvent::CmdParkRotator),
            ClientEvent::StopRotator => forward(registry, ServerEvent::CmdStopRotator),
            ClientEvent::PauseFrequencyUpdates => {
                forward(registry, ServerEvent::CmdPauseFrequencyUpdates)
            }
            ClientEvent::ResumeFrequencyUpdates => {
                forward(registry, ServerEvent::CmdResumeFrequencyUpdates)
            }

            ClientEvent::UpdateSatelliteList(SatelliteCatalogUpdate { satellites }) => {
                if !from_controller(registry, connection_id, "update_satellite_list") {
                    return;
                }
                if let Some(satellites) = satellites {
                    debug!(count = satellites.len(), "satellite catalog replaced");
                    store.replace_satellite_catalog(satellites);
                    fan_out(registry, satellite_list(store));
                }
            }
            ClientEvent::UpdateTransponderList(TransponderCatalogUpdate {
                satellite,
                transponders,
            }) => {
                if !from_controller(registry, connection_id, "update_transponder_list") {
                    return;
                }
                if let (Some(satellite), Some(transponders)) = (non_empty(satellite), transponders)
                {
                    debug!(
                        satellite = %satellite,
                        count = transponders.len(),
                        "transponder list replaced"
                    );
                    store.replace_transponder_list(satellite.clone(), transponders.clone());
                    let update = ServerEvent::TransponderList {
                        satellite: Some(satellite),
                        transponders,
                        current: store.snapshot().transponder.clone(),
                    };
                    fan_out(registry, update);
                }
            }

            ClientEvent::GetStatus => reply(
                registry,
                connection_id,
                ServerEvent::Status(store.snapshot().clone()),
            ),
            ClientEvent::GetSatelliteList => {
                reply(registry, connection_id, satellite_list(store))
            }
            ClientEvent::GetTransponderList(TransponderQuery { satellite }) => {
                let Some(satellite) = non_empty(satellite) else {
                    return;
                };
                match store.transponder_list(&satellite) {
                    Ok(transponders) => {
                        let cached = ServerEvent::TransponderList {
                            satellite: Some(satellite.clone()),
                            transponders: transponders.to_vec(),
                            current: store.snapshot().transponder.clone(),
                        };
                        reply(registry, connection_id, cached);
                    }
                    Err(RelayError::CatalogMiss { satellite }) => {
                        forward(registry, ServerEvent::CmdGetTransponderList { satellite });
                    }
                    Err(err) => debug!(error = %err, "transponder lookup failed"),
                }
            }

            ClientEvent::StartAudioTx => match audio.request_start(connection_id, registry) {
                Ok(()) => {
                    counter!("qtrig_hub_audio_sessions_started_total", 1);
                    info!(connection_id = %connection_id, "audio session active");
                }
                Err(err) => {
                    counter!(
                        "qtrig_hub_audio_sessions_rejected_total",
                        1,
                        "reason" => err.code()
                    );
                    info!(
                        connection_id = %connection_id,
                        reason = err.code(),
                        "audio session request rejected"
                    );
                    reply(
                        registry,
                        connection_id,
                        ServerEvent::audio_rejected(err.code(), err.to_string()),
                    );
                }
            },
            ClientEvent::StopAudioTx => match audio.request_stop(connection_id, registry) {
                Ok(true) => {
                    counter!("qtrig_hub_audio_sessions_released_total", 1, "reason" => "stop");
                    info!(connection_id = %connection_id, "audio session released");
                }
                Ok(false) => {}
                Err(err) => {
                    counter!("qtrig_hub_audio_sessions_released_total", 1, "reason" => "stop");
                    debug!(error = %err, "audio session released; stop command not delivered");
                }
            },
            ClientEvent::AudioData(payload) => {
                if audio.relay_audio_data(connection_id, payload, registry).is_err() {
                    counter!("qtrig_hub_audio_packets_dropped_total", 1);
                }
            }
            ClientEvent::MuteTx => {
                let _ = audio.relay_mute_toggle(connection_id, true, registry);
            }
            ClientEvent::UnmuteTx => {
                let _ = audio.relay_mute_toggle(connection_id, false, registry);
            }

            ClientEvent::AudioTxStatus(payload) => {
                if from_controller(registry, connection_id, "audio_tx_status") {
                    notify_audio(registry, audio, ServerEvent::AudioTxStatus(payload));
                }
            }
            ClientEvent::AudioError(payload) => {
                if from_controller(registry, connection_id, "audio_error") {
                    notify_audio(registry, audio, ServerEvent::AudioError(payload));
                }
            }
            ClientEvent::RxAudioData(payload) => {
                if !from_controller(registry, connection_id, "rx_audio_data") {
                    return;
                }
                if let Err(err) =
                    registry.broadcast_except(&ServerEvent::RxAudioData(payload), connection_id)
                {
                    debug!(error = %err, "rx audio not relayed");
                }
            }
        }
    }

    pub fn status(&self) -> HubStatus {
        let guard = self.inner.state.lock();
        HubStatus {
            status: "running",
            uptime_seconds: self.inner.started_at.elapsed().as_secs_f64(),
            qtrig_connected: guard.liveness.is_reachable(),
            clients: guard.registry.len(),
        }
    }

    pub fn controller(&self) -> Option<ConnectionId> {
        self.inner.state.lock().registry.controller()
    }

    pub fn audio_owner(&self) -> Option<ConnectionId> {
        self.inner.state.lock().audio.owner()
    }
}

fn satellite_list(store: &StateStore) -> ServerEvent {
    ServerEvent::SatelliteList {
        satellites: store.satellite_catalog().to_vec(),
        current: store.snapshot().satellite.clone(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn from_controller(
    registry: &ConnectionRegistry,
    connection_id: ConnectionId,
    event: &'static str,
) -> bool {
    if registry.is_controller(connection_id) {
        return true;
    }
    counter!("qtrig_hub_events_ignored_total", 1, "event" => event);
    debug!(
        connection_id = %connection_id,
        event,
        "ignoring controller-only event from non-controller"
    );
    false
}

/// Best-effort command delivery: no controller means the command is dropped.
fn forward(registry: &ConnectionRegistry, command: ServerEvent) {
    match registry.send_to_controller(&command) {
        Ok(()) => {}
        Err(RelayError::ControllerUnavailable) => {
            counter!("qtrig_hub_commands_dropped_total", 1, "event" => command.name());
        }
        Err(err) => debug!(error = %err, event = command.name(), "command not delivered"),
    }
}

fn reply(registry: &ConnectionRegistry, connection_id: ConnectionId, event: ServerEvent) {
    if let Err(err) = registry.send_to(connection_id, &event) {
        debug!(
            connection_id = %connection_id,
            event = event.name(),
            error = %err,
            "reply not delivered"
        );
    }
}

fn fan_out(registry: &ConnectionRegistry, event: ServerEvent) {
    match registry.broadcast(&event) {
        Ok(metrics) => {
            if metrics.dropped > 0 || metrics.closed > 0 {
                debug!(
                    event = event.name(),
                    delivered = metrics.delivered,
                    dropped = metrics.dropped,
                    closed = metrics.closed,
                    "broadcast partially delivered"
                );
            }
        }
        Err(err) => warn!(event = event.name(), error = %err, "broadcast failed"),
    }
}

// The owner also receives the broadcast copy; clients tolerate the duplicate.
fn notify_audio(registry: &ConnectionRegistry, audio: &AudioArbiter, event: ServerEvent) {
    fan_out(registry, event.clone());
    if let Some(owner) = audio.owner() {
        reply(registry, owner, event);
    }
}
