//! Inbound command dispatcher
//!
//! Maps inbound `(topic, payload)` pairs onto actuator flags. Payloads come
//! from the network and are untrusted: anything outside the `"true"` /
//! `"false"` vocabulary is logged and dropped, never propagated.

use heapless::Vec;
use log::{info, warn};

use crate::config::{CommandRoute, MAX_COMMAND_ROUTES, NodeConfig};
use crate::state::NodeState;

/// Recognized command payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    On,
    Off,
}

impl Command {
    /// Parse a payload; case-sensitive, no surrounding whitespace allowed
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match core::str::from_utf8(payload).ok()? {
            "true" => Some(Command::On),
            "false" => Some(Command::Off),
            _ => None,
        }
    }

    pub fn value(&self) -> bool {
        matches!(self, Command::On)
    }
}

/// What the dispatcher did with one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Flag set; carries the new value
    Applied(bool),
    /// Payload outside the vocabulary, state untouched
    Invalid,
    /// Topic not in the dispatch table
    Ignored,
}

/// Dispatch table from command topics to actuator flags
pub struct CommandDispatcher {
    routes: Vec<CommandRoute, MAX_COMMAND_ROUTES>,
}

impl CommandDispatcher {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            routes: config.topics.commands.clone(),
        }
    }

    pub fn routes(&self) -> &[CommandRoute] {
        &self.routes
    }

    /// Apply one inbound message to `state`
    pub fn on_message(
        &self,
        state: &mut NodeState,
        topic: &str,
        payload: &[u8],
    ) -> DispatchOutcome {
        let Some(route) = self.routes.iter().find(|route| route.topic.as_str() == topic) else {
            return DispatchOutcome::Ignored;
        };

        let Some(command) = Command::parse(payload) else {
            warn!(
                "[CMD] Invalid command on '{}': bad payload {:?}",
                topic,
                PayloadDisplay(payload)
            );
            return DispatchOutcome::Invalid;
        };

        let value = command.value();
        match state.set_actuator(&route.actuator, value) {
            Ok(previous) => {
                if previous != Some(value) {
                    info!(
                        "[CMD] '{}' is {}!",
                        route.actuator.as_str(),
                        if value { "activated" } else { "deactivated" }
                    );
                }
                DispatchOutcome::Applied(value)
            }
            Err(()) => {
                warn!(
                    "[CMD] No room for actuator '{}', command dropped",
                    route.actuator.as_str()
                );
                DispatchOutcome::Invalid
            }
        }
    }
}

/// Payload as text when it is UTF-8, as bytes otherwise
struct PayloadDisplay<'a>(&'a [u8]);

impl core::fmt::Debug for PayloadDisplay<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match core::str::from_utf8(self.0) {
            Ok(text) => write!(f, "{:?}", text),
            Err(_) => write!(f, "{:02x?}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIGHT: &str = "light/chain/main";

    fn setup() -> (CommandDispatcher, NodeState) {
        let config = NodeConfig::default();
        (CommandDispatcher::new(&config), NodeState::for_config(&config))
    }

    #[test]
    fn true_and_false_drive_the_flag() {
        let (dispatcher, mut state) = setup();

        assert_eq!(
            dispatcher.on_message(&mut state, LIGHT, b"true"),
            DispatchOutcome::Applied(true)
        );
        assert_eq!(state.actuator("chain_main"), Some(true));

        assert_eq!(
            dispatcher.on_message(&mut state, LIGHT, b"false"),
            DispatchOutcome::Applied(false)
        );
        assert_eq!(state.actuator("chain_main"), Some(false));
    }

    #[test]
    fn anything_else_leaves_state_alone() {
        let (dispatcher, mut state) = setup();
        dispatcher.on_message(&mut state, LIGHT, b"true");
        let before = state.clone();

        for payload in [
            &b"maybe"[..],
            b"TRUE",
            b"True",
            b" true",
            b"true\n",
            b"",
            b"1",
            &[0xffu8, 0xfe][..],
        ] {
            assert_eq!(
                dispatcher.on_message(&mut state, LIGHT, payload),
                DispatchOutcome::Invalid
            );
        }
        assert_eq!(state, before);
    }

    #[test]
    fn unknown_topic_is_ignored() {
        let (dispatcher, mut state) = setup();
        let before = state.clone();
        assert_eq!(
            dispatcher.on_message(&mut state, "light/chain/garage", b"true"),
            DispatchOutcome::Ignored
        );
        assert_eq!(state, before);
    }

    #[test]
    fn routes_are_independent() {
        let (dispatcher, mut state) = setup();
        dispatcher.on_message(&mut state, "light/chain/living", b"true");
        assert_eq!(state.actuator("chain_living"), Some(true));
        assert_eq!(state.actuator("chain_main"), Some(false));
    }
}
