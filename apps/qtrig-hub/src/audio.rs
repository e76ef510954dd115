use serde_json::Value;

use crate::error::RelayError;
use crate::protocol::ServerEvent;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Grants the radio's transmit path to at most one connection at a time.
///
/// Idle when `owner` is `None`. Every transition is decided and applied
/// while the caller holds the hub lock, so two start requests can never both
/// observe an idle session.
#[derive(Debug, Default)]
pub struct AudioArbiter {
    owner: Option<ConnectionId>,
}

impl AudioArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> Option<ConnectionId> {
        self.owner
    }

    pub fn is_owner(&self, connection_id: ConnectionId) -> bool {
        self.owner == Some(connection_id)
    }

    /// Starting again while already the owner re-sends the start command.
    /// The session is only taken once the controller has been handed the
    /// command.
    pub fn request_start(
        &mut self,
        connection_id: ConnectionId,
        registry: &ConnectionRegistry,
    ) -> Result<(), RelayError> {
        if let Some(owner) = self.owner {
            if owner != connection_id {
                return Err(RelayError::SessionBusy { owner });
            }
        }
        registry.send_to_controller(&ServerEvent::CmdStartAudioTx)?;
        self.owner = Some(connection_id);
        Ok(())
    }

    /// `Ok(false)` when the caller does not own the session. On release the
    /// session is idle even if the stop command could not be delivered; that
    /// failure is returned for the caller to account for.
    pub fn request_stop(
        &mut self,
        connection_id: ConnectionId,
        registry: &ConnectionRegistry,
    ) -> Result<bool, RelayError> {
        if !self.is_owner(connection_id) {
            return Ok(false);
        }
        self.owner = None;
        registry.send_to_controller(&ServerEvent::CmdStopAudioTx)?;
        Ok(true)
    }

    pub fn on_owner_disconnect(
        &mut self,
        connection_id: ConnectionId,
        registry: &ConnectionRegistry,
    ) -> Result<bool, RelayError> {
        self.request_stop(connection_id, registry)
    }

    pub fn relay_audio_data(
        &self,
        connection_id: ConnectionId,
        payload: Value,
        registry: &ConnectionRegistry,
    ) -> Result<(), RelayError> {
        self.ensure_owner(connection_id)?;
        registry.send_to_controller(&ServerEvent::CmdAudioData(payload))
    }

    pub fn relay_mute_toggle(
        &self,
        connection_id: ConnectionId,
        muted: bool,
        registry: &ConnectionRegistry,
    ) -> Result<(), RelayError> {
        self.ensure_owner(connection_id)?;
        let command = if muted {
            ServerEvent::CmdMuteTx
        } else {
            ServerEvent::CmdUnmuteTx
        };
        registry.send_to_controller(&command)
    }

    fn ensure_owner(&self, connection_id: ConnectionId) -> Result<(), RelayError> {
        if self.is_owner(connection_id) {
            Ok(())
        } else {
            Err(RelayError::NotSessionOwner(connection_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use serde_json::json;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Fixture {
        registry: ConnectionRegistry,
        controller: ConnectionId,
        controller_rx: mpsc::Receiver<Message>,
        a: ConnectionId,
        b: ConnectionId,
        _observer_rx: Vec<mpsc::Receiver<Message>>,
    }

    fn fixture() -> Fixture {
        let mut registry = ConnectionRegistry::new();
        let controller = Uuid::new_v4();
        let (tx, controller_rx) = mpsc::channel(32);
        registry.register(controller, tx);
        registry.register_controller(controller).unwrap();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut observer_rx = Vec::new();
        for id in [a, b] {
            let (tx, rx) = mpsc::channel(32);
            registry.register(id, tx);
            observer_rx.push(rx);
        }
        Fixture {
            registry,
            controller,
            controller_rx,
            a,
            b,
            _observer_rx: observer_rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            let value: Value = serde_json::from_str(&text).unwrap();
            names.push(value["event"].as_str().unwrap().to_string());
        }
        names
    }

    #[test]
    fn second_requester_is_rejected_until_release() {
        let mut f = fixture();
        let mut arbiter = AudioArbiter::new();

        arbiter.request_start(f.a, &f.registry).unwrap();
        assert!(matches!(
            arbiter.request_start(f.b, &f.registry),
            Err(RelayError::SessionBusy { owner }) if owner == f.a
        ));
        assert_eq!(arbiter.owner(), Some(f.a));

        assert!(arbiter.request_stop(f.a, &f.registry).unwrap());
        arbiter.request_start(f.b, &f.registry).unwrap();
        assert_eq!(arbiter.owner(), Some(f.b));

        assert_eq!(
            drain(&mut f.controller_rx),
            vec!["cmd_start_audio_tx", "cmd_stop_audio_tx", "cmd_start_audio_tx"]
        );
    }

    #[test]
    fn restart_by_owner_is_idempotent() {
        let mut f = fixture();
        let mut arbiter = AudioArbiter::new();

        arbiter.request_start(f.a, &f.registry).unwrap();
        arbiter.request_start(f.a, &f.registry).unwrap();
        assert_eq!(arbiter.owner(), Some(f.a));
        assert_eq!(
            drain(&mut f.controller_rx),
            vec!["cmd_start_audio_tx", "cmd_start_audio_tx"]
        );
    }

    #[test]
    fn start_without_controller_leaves_session_idle() {
        let mut f = fixture();
        let mut arbiter = AudioArbiter::new();
        f.registry.unregister(f.controller);

        assert!(matches!(
            arbiter.request_start(f.a, &f.registry),
            Err(RelayError::ControllerUnavailable)
        ));
        assert_eq!(arbiter.owner(), None);
    }

    #[test]
    fn stop_from_non_owner_is_a_no_op() {
        let mut f = fixture();
        let mut arbiter = AudioArbiter::new();

        assert!(!arbiter.request_stop(f.a, &f.registry).unwrap());
        arbiter.request_start(f.a, &f.registry).unwrap();
        assert!(!arbiter.request_stop(f.b, &f.registry).unwrap());
        assert_eq!(arbiter.owner(), Some(f.a));
        assert_eq!(drain(&mut f.controller_rx), vec!["cmd_start_audio_tx"]);
    }

    #[test]
    fn owner_disconnect_emits_exactly_one_stop() {
        let mut f = fixture();
        let mut arbiter = AudioArbiter::new();
        arbiter.request_start(f.a, &f.registry).unwrap();
        drain(&mut f.controller_rx);

        assert!(arbiter.on_owner_disconnect(f.a, &f.registry).unwrap());
        assert!(!arbiter.on_owner_disconnect(f.a, &f.registry).unwrap());
        assert_eq!(arbiter.owner(), None);
        assert_eq!(drain(&mut f.controller_rx), vec!["cmd_stop_audio_tx"]);
    }

    #[test]
    fn release_without_controller_still_goes_idle() {
        let mut f = fixture();
        let mut arbiter = AudioArbiter::new();
        arbiter.request_start(f.a, &f.registry).unwrap();
        f.registry.unregister(f.controller);

        assert!(matches!(
            arbiter.on_owner_disconnect(f.a, &f.registry),
            Err(RelayError::ControllerUnavailable)
        ));
        assert_eq!(arbiter.owner(), None);
    }

    #[test]
    fn audio_and_mute_are_gated_on_ownership() {
        let mut f = fixture();
        let mut arbiter = AudioArbiter::new();
        arbiter.request_start(f.a, &f.registry).unwrap();
        drain(&mut f.controller_rx);

        assert!(matches!(
            arbiter.relay_audio_data(f.b, json!([1, 2, 3]), &f.registry),
            Err(RelayError::NotSessionOwner(id)) if id == f.b
        ));
        assert!(arbiter.relay_mute_toggle(f.b, true, &f.registry).is_err());
        assert!(drain(&mut f.controller_rx).is_empty());

        arbiter
            .relay_audio_data(f.a, json!([1, 2, 3]), &f.registry)
            .unwrap();
        arbiter.relay_mute_toggle(f.a, true, &f.registry).unwrap();
        arbiter.relay_mute_toggle(f.a, false, &f.registry).unwrap();
        assert_eq!(
            drain(&mut f.controller_rx),
            vec!["cmd_audio_data", "cmd_mute_tx", "cmd_unmute_tx"]
        );
    }
}
