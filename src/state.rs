//! Shared node state
//!
//! Local view of everything the node reads or controls. Owned by the node
//! loop and lent to the publishers (read), the sensor poll (write) and the
//! command dispatcher (actuator flags). Single-threaded, so no locking.

use embassy_time::Duration;
use heapless::{FnvIndexMap, String};

use crate::config::{MAX_ACTUATOR_NAME_LEN, NodeConfig};
use crate::encoder::RotaryMove;

/// Maximum number of actuator flags, power of two for the index map
pub const MAX_ACTUATORS: usize = 8;

/// Number of local input devices polled by the node loop
pub const INPUT_DEVICES: usize = 2;

pub type ActuatorName = String<MAX_ACTUATOR_NAME_LEN>;

/// Last observed activity of one input device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputActivity {
    pub last_move: RotaryMove,
    /// Net clockwise steps since boot
    pub position: i32,
    pub presses: u32,
}

impl Default for InputActivity {
    fn default() -> Self {
        Self {
            last_move: RotaryMove::None,
            position: 0,
            presses: 0,
        }
    }
}

impl InputActivity {
    pub fn record(&mut self, mv: RotaryMove) {
        match mv {
            RotaryMove::None => return,
            RotaryMove::Clockwise => self.position = self.position.wrapping_add(1),
            RotaryMove::CounterClockwise => self.position = self.position.wrapping_sub(1),
            RotaryMove::Pressed => self.presses = self.presses.wrapping_add(1),
        }
        self.last_move = mv;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    /// Corrected temperature in °C
    pub temperature: f32,
    /// Relative humidity in %
    pub humidity: f32,
    pub uptime: Duration,
    actuators: FnvIndexMap<ActuatorName, bool, MAX_ACTUATORS>,
    pub inputs: [InputActivity; INPUT_DEVICES],
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeState {
    pub fn new() -> Self {
        Self {
            temperature: 0.0,
            humidity: 0.0,
            uptime: Duration::from_ticks(0),
            actuators: FnvIndexMap::new(),
            inputs: [InputActivity::default(); INPUT_DEVICES],
        }
    }

    /// State with every routed actuator registered and off
    pub fn for_config(config: &NodeConfig) -> Self {
        let mut state = Self::new();
        for route in config.topics.commands.iter() {
            let _ = state.actuators.insert(route.actuator.clone(), false);
        }
        state
    }

    /// Current value of an actuator flag, `None` if it was never set
    pub fn actuator(&self, name: &str) -> Option<bool> {
        self.actuators
            .iter()
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, value)| *value)
    }

    /// Set an actuator flag, returns the previous value.
    /// Fails when the flag is new and the table is full.
    pub fn set_actuator(&mut self, name: &ActuatorName, value: bool) -> Result<Option<bool>, ()> {
        self.actuators
            .insert(name.clone(), value)
            .map_err(|_| ())
    }

    pub fn actuators(&self) -> impl Iterator<Item = (&str, bool)> {
        self.actuators.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Uptime in whole seconds, as published in the liveness record
    pub fn uptime_secs(&self) -> u64 {
        self.uptime.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_registers_routed_actuators_off() {
        let state = NodeState::for_config(&NodeConfig::default());
        assert_eq!(state.actuator("chain_main"), Some(false));
        assert_eq!(state.actuator("chain_living"), Some(false));
        assert_eq!(state.actuator("buzzer"), None);
    }

    #[test]
    fn set_actuator_reports_previous_value() {
        let mut state = NodeState::new();
        let name = ActuatorName::try_from("chain_main").unwrap();
        assert_eq!(state.set_actuator(&name, true), Ok(None));
        assert_eq!(state.set_actuator(&name, false), Ok(Some(true)));
        assert_eq!(state.actuator("chain_main"), Some(false));
    }

    #[test]
    fn input_activity_tracks_position_and_presses() {
        let mut activity = InputActivity::default();
        activity.record(RotaryMove::Clockwise);
        activity.record(RotaryMove::Clockwise);
        activity.record(RotaryMove::CounterClockwise);
        activity.record(RotaryMove::None);
        assert_eq!(activity.position, 1);
        assert_eq!(activity.last_move, RotaryMove::CounterClockwise);

        activity.record(RotaryMove::Pressed);
        assert_eq!(activity.presses, 1);
        assert_eq!(activity.last_move, RotaryMove::Pressed);
    }
}
