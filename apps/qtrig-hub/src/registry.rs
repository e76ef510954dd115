use std::collections::HashMap;
use std::time::Instant;

use axum::extract::ws::Message;
use metrics::counter;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::error::RelayError;
use crate::protocol::ServerEvent;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Observer,
    Controller,
}

struct ConnectionEntry {
    sender: mpsc::Sender<Message>,
    connected_at: Instant,
}

/// Result of fanning one event out to every connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastMetrics {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

/// Every live connection and which one, if any, is the controller.
///
/// The controller is a single identifier rather than a per-connection flag,
/// so registering a new controller implicitly demotes the previous one.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    controller: Option<ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connection_id: ConnectionId, sender: mpsc::Sender<Message>) {
        self.connections.insert(
            connection_id,
            ConnectionEntry {
                sender,
                connected_at: Instant::now(),
            },
        );
    }

    /// Returns the connection that held the role before, if it differs.
    pub fn register_controller(
        &mut self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConnectionId>, RelayError> {
        if !self.connections.contains_key(&connection_id) {
            return Err(RelayError::UnknownConnection(connection_id));
        }
        let previous = self.controller.replace(connection_id);
        Ok(previous.filter(|prev| *prev != connection_id))
    }

    /// Removes the connection and reports the role it held.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<Role> {
        let entry = self.connections.remove(&connection_id)?;
        debug!(
            connection_id = %connection_id,
            connected_for_ms = entry.connected_at.elapsed().as_millis() as u64,
            "connection unregistered"
        );
        if self.controller == Some(connection_id) {
            self.controller = None;
            Some(Role::Controller)
        } else {
            Some(Role::Observer)
        }
    }

    pub fn role(&self, connection_id: ConnectionId) -> Option<Role> {
        if !self.connections.contains_key(&connection_id) {
            return None;
        }
        if self.controller == Some(connection_id) {
            Some(Role::Controller)
        } else {
            Some(Role::Observer)
        }
    }

    pub fn is_controller(&self, connection_id: ConnectionId) -> bool {
        self.controller == Some(connection_id)
    }

    pub fn is_controller_connected(&self) -> bool {
        self.controller.is_some()
    }

    pub fn controller(&self) -> Option<ConnectionId> {
        self.controller
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn broadcast(&self, event: &ServerEvent) -> Result<BroadcastMetrics, RelayError> {
        self.fan_out(event, None)
    }

    /// Broadcast to everyone but `excluded`, typically the event's sender.
    pub fn broadcast_except(
        &self,
        event: &ServerEvent,
        excluded: ConnectionId,
    ) -> Result<BroadcastMetrics, RelayError> {
        self.fan_out(event, Some(excluded))
    }

    fn fan_out(
        &self,
        event: &ServerEvent,
        excluded: Option<ConnectionId>,
    ) -> Result<BroadcastMetrics, RelayError> {
        let frame = event.to_frame()?;
        let mut metrics = BroadcastMetrics::default();
        for (connection_id, entry) in &self.connections {
            if excluded == Some(*connection_id) {
                continue;
            }
            match push(*connection_id, &entry.sender, frame.clone()) {
                Ok(()) => metrics.delivered += 1,
                Err(RelayError::Backpressure(_)) => metrics.dropped += 1,
                Err(_) => metrics.closed += 1,
            }
        }
        Ok(metrics)
    }

    /// Silently undeliverable when nobody holds the controller role; callers
    /// decide whether that matters.
    pub fn send_to_controller(&self, event: &ServerEvent) -> Result<(), RelayError> {
        let controller = self.controller.ok_or(RelayError::ControllerUnavailable)?;
        self.send_to(controller, event)
    }

    pub fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent) -> Result<(), RelayError> {
        let entry = self
            .connections
            .get(&connection_id)
            .ok_or(RelayError::UnknownConnection(connection_id))?;
        push(connection_id, &entry.sender, event.to_frame()?)
    }
}

fn push(
    connection_id: ConnectionId,
    sender: &mpsc::Sender<Message>,
    frame: Message,
) -> Result<(), RelayError> {
    match sender.try_send(frame) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            counter!("qtrig_hub_flow_control_drops_total", 1);
            Err(RelayError::Backpressure(connection_id))
        }
        Err(TrySendError::Closed(_)) => {
            debug!(connection_id = %connection_id, "outbound channel closed before unregister");
            Err(RelayError::ConnectionClosed(connection_id))
        }
    }
}
