use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::error::RelayError;

/// Latest hardware/tracking state reported by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationState {
    pub tracking: bool,
    pub satellite: Option<String>,
    pub transponder: Option<String>,
    pub rx_offset: Number,
    pub subtone: String,
    pub satellite_info: Map<String, Value>,
    pub satellite_position: Map<String, Value>,
    pub doppler: Map<String, Value>,
    pub rotator_enabled: bool,
    pub rotator: Map<String, Value>,
    pub frequency_updates_paused: bool,
    /// Keys the controller reports that the hub does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ApplicationState {
    fn default() -> Self {
        Self {
            tracking: false,
            satellite: None,
            transponder: None,
            rx_offset: Number::from(0),
            subtone: "None".to_string(),
            satellite_info: Map::new(),
            satellite_position: Map::new(),
            doppler: Map::new(),
            rotator_enabled: false,
            rotator: Map::new(),
            frequency_updates_paused: false,
            extra: Map::new(),
        }
    }
}

impl ApplicationState {
    /// Shallow merge: each key replaces the current value wholesale.
    ///
    /// A value whose type does not fit its field is skipped and its key is
    /// returned; the remaining keys are still applied.
    pub fn merge(&mut self, update: Map<String, Value>) -> Vec<String> {
        let mut rejected = Vec::new();
        for (key, value) in update {
            if let Err(err) = self.apply_field(&key, value) {
                debug!(key = %key, error = %err, "ignoring state field with unexpected type");
                rejected.push(key);
            }
        }
        rejected
    }

    fn apply_field(&mut self, key: &str, value: Value) -> Result<(), serde_json::Error> {
        match key {
            "tracking" => self.tracking = serde_json::from_value(value)?,
            "satellite" => self.satellite = serde_json::from_value(value)?,
            "transponder" => self.transponder = serde_json::from_value(value)?,
            "rx_offset" => self.rx_offset = serde_json::from_value(value)?,
            "subtone" => self.subtone = serde_json::from_value(value)?,
            "satellite_info" => self.satellite_info = serde_json::from_value(value)?,
            "satellite_position" => self.satellite_position = serde_json::from_value(value)?,
            "doppler" => self.doppler = serde_json::from_value(value)?,
            "rotator_enabled" => self.rotator_enabled = serde_json::from_value(value)?,
            "rotator" => self.rotator = serde_json::from_value(value)?,
            "frequency_updates_paused" => {
                self.frequency_updates_paused = serde_json::from_value(value)?
            }
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
        Ok(())
    }
}

/// The single application-state record plus the satellite/transponder
/// catalogs cached for late-joining observers.
#[derive(Debug, Default)]
pub struct StateStore {
    state: ApplicationState,
    satellites: Vec<Value>,
    transponders: HashMap<String, Vec<Value>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callers must have checked that the update came from the controller.
    pub fn apply_merge(&mut self, update: Map<String, Value>) -> Vec<String> {
        self.state.merge(update)
    }

    pub fn snapshot(&self) -> &ApplicationState {
        &self.state
    }

    pub fn replace_satellite_catalog(&mut self, satellites: Vec<Value>) {
        self.satellites = satellites;
    }

    pub fn satellite_catalog(&self) -> &[Value] {
        &self.satellites
    }

    pub fn replace_transponder_list(&mut self, satellite: String, transponders: Vec<Value>) {
        self.transponders.insert(satellite, transponders);
    }

    pub fn transponder_list(&self, satellite: &str) -> Result<&[Value], RelayError> {
        self.transponders
            .get(satellite)
            .map(Vec::as_slice)
            .ok_or_else(|| RelayError::CatalogMiss {
                satellite: satellite.to_string(),
            })
    }

    /// Transponders for the currently selected satellite, if both are known.
    pub fn current_transponders(&self) -> Option<(&str, &[Value])> {
        let satellite = self.state.satellite.as_deref()?;
        let list = self.transponders.get(satellite)?;
        Some((satellite, list.as_slice()))
    }
}
