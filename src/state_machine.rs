//! Bus session state machine
//!
//! Tracks the MQTT session of the node. The machine is pure: it maps
//! `(state, event)` to a transition and lists the actions the session
//! manager has to carry out in the current state. I/O stays in
//! [`crate::session`].

use heapless::Vec;
use log::{info, warn};

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; a connection attempt is made once link and timer allow
    Disconnected,
    /// Handshake in flight
    Connecting,
    /// Session established
    Connected,
}

/// Session events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Link is up and the reconnect timer elapsed
    ReconnectDue,
    HandshakeSucceeded,
    HandshakeFailed,
    /// Transport reports the session is gone
    TransportDisconnected,
}

/// State transition result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// Keep the current state
    Stay,
    /// Move to a new state
    Transition(SessionState),
}

/// Actions the session manager executes for the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start the transport handshake
    StartHandshake,
    /// Subscribe to the fixed topic set
    Resubscribe,
    /// Poll the transport for inbound messages
    PollInbound,
    /// Re-arm the reconnect timer
    ArmReconnectTimer,
}

/// Session state machine
pub struct SessionStateMachine {
    current_state: SessionState,
    previous_state: Option<SessionState>,
    /// Set on entry to `Connected`, cleared once subscriptions went out
    resubscribe_pending: bool,
    handshake_attempts: u32,
    failed_handshakes: u32,
    sessions: u32,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: SessionState::Disconnected,
            previous_state: None,
            resubscribe_pending: false,
            handshake_attempts: 0,
            failed_handshakes: 0,
            sessions: 0,
        }
    }

    pub fn get_current_state(&self) -> SessionState {
        self.current_state
    }

    pub fn get_previous_state(&self) -> Option<SessionState> {
        self.previous_state
    }

    pub fn is_connected(&self) -> bool {
        self.current_state == SessionState::Connected
    }

    /// Total handshakes started since boot
    pub fn handshake_attempts(&self) -> u32 {
        self.handshake_attempts
    }

    /// Handshakes that failed since boot
    pub fn failed_handshakes(&self) -> u32 {
        self.failed_handshakes
    }

    /// Sessions established since boot
    pub fn sessions(&self) -> u32 {
        self.sessions
    }

    /// Feed an event into the machine
    pub fn handle_event(&mut self, event: SessionEvent) -> StateTransition {
        let transition = self.get_state_transition(self.current_state, event);

        if let StateTransition::Transition(new_state) = transition {
            self.transition_to_state(new_state);
        }

        transition
    }

    /// Actions due in the current state
    pub fn update(&self) -> Vec<Action, 2> {
        let mut actions = Vec::new();

        match self.current_state {
            SessionState::Disconnected => {}
            SessionState::Connecting => {
                let _ = actions.push(Action::StartHandshake);
            }
            SessionState::Connected => {
                if self.resubscribe_pending {
                    let _ = actions.push(Action::Resubscribe);
                }
                let _ = actions.push(Action::PollInbound);
            }
        }

        actions
    }

    /// Actions that follow a handled event
    pub fn actions_for(&self, event: SessionEvent) -> Vec<Action, 2> {
        let mut actions = Vec::new();
        if matches!(
            event,
            SessionEvent::HandshakeSucceeded | SessionEvent::HandshakeFailed
        ) {
            let _ = actions.push(Action::ArmReconnectTimer);
        }
        actions
    }

    /// Mark the subscriptions of the current session as sent
    pub fn mark_resubscribed(&mut self) {
        self.resubscribe_pending = false;
    }

    fn transition_to_state(&mut self, new_state: SessionState) {
        if new_state == self.current_state {
            return;
        }

        match new_state {
            SessionState::Connecting => {
                self.handshake_attempts += 1;
            }
            SessionState::Connected => {
                self.sessions += 1;
                self.resubscribe_pending = true;
                info!("[STATE] Session established (#{})", self.sessions);
            }
            SessionState::Disconnected => {
                if self.current_state == SessionState::Connecting {
                    self.failed_handshakes += 1;
                } else {
                    warn!("[STATE] Session lost");
                }
                self.resubscribe_pending = false;
            }
        }

        self.previous_state = Some(self.current_state);
        self.current_state = new_state;
    }

    fn get_state_transition(
        &self,
        current_state: SessionState,
        event: SessionEvent,
    ) -> StateTransition {
        match (current_state, event) {
            (SessionState::Disconnected, SessionEvent::ReconnectDue) => {
                StateTransition::Transition(SessionState::Connecting)
            }

            (SessionState::Connecting, SessionEvent::HandshakeSucceeded) => {
                StateTransition::Transition(SessionState::Connected)
            }
            (SessionState::Connecting, SessionEvent::HandshakeFailed) => {
                StateTransition::Transition(SessionState::Disconnected)
            }

            (SessionState::Connected, SessionEvent::TransportDisconnected) => {
                StateTransition::Transition(SessionState::Disconnected)
            }
            (SessionState::Connecting, SessionEvent::TransportDisconnected) => {
                StateTransition::Transition(SessionState::Disconnected)
            }

            // Reconnecting while connected is a no-op
            _ => StateTransition::Stay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected_without_actions() {
        let sm = SessionStateMachine::new();
        assert_eq!(sm.get_current_state(), SessionState::Disconnected);
        assert!(sm.update().is_empty());
    }

    #[test]
    fn successful_handshake_connects_and_requests_resubscribe() {
        let mut sm = SessionStateMachine::new();

        assert_eq!(
            sm.handle_event(SessionEvent::ReconnectDue),
            StateTransition::Transition(SessionState::Connecting)
        );
        assert_eq!(sm.update().as_slice(), &[Action::StartHandshake]);

        sm.handle_event(SessionEvent::HandshakeSucceeded);
        assert!(sm.is_connected());
        assert_eq!(
            sm.update().as_slice(),
            &[Action::Resubscribe, Action::PollInbound]
        );

        sm.mark_resubscribed();
        assert_eq!(sm.update().as_slice(), &[Action::PollInbound]);
        assert_eq!(sm.sessions(), 1);
        assert_eq!(sm.handshake_attempts(), 1);
    }

    #[test]
    fn failed_handshake_returns_to_disconnected() {
        let mut sm = SessionStateMachine::new();
        sm.handle_event(SessionEvent::ReconnectDue);
        sm.handle_event(SessionEvent::HandshakeFailed);

        assert_eq!(sm.get_current_state(), SessionState::Disconnected);
        assert_eq!(sm.get_previous_state(), Some(SessionState::Connecting));
        assert_eq!(sm.failed_handshakes(), 1);
        assert_eq!(
            sm.actions_for(SessionEvent::HandshakeFailed).as_slice(),
            &[Action::ArmReconnectTimer]
        );
    }

    #[test]
    fn reconnect_while_connected_is_noop() {
        let mut sm = SessionStateMachine::new();
        sm.handle_event(SessionEvent::ReconnectDue);
        sm.handle_event(SessionEvent::HandshakeSucceeded);

        assert_eq!(sm.handle_event(SessionEvent::ReconnectDue), StateTransition::Stay);
        assert_eq!(sm.handshake_attempts(), 1);
    }

    #[test]
    fn resubscribe_requested_once_per_session() {
        let mut sm = SessionStateMachine::new();
        for session in 1..=3 {
            sm.handle_event(SessionEvent::ReconnectDue);
            sm.handle_event(SessionEvent::HandshakeSucceeded);
            assert!(sm.update().contains(&Action::Resubscribe));
            sm.mark_resubscribed();
            assert!(!sm.update().contains(&Action::Resubscribe));

            sm.handle_event(SessionEvent::TransportDisconnected);
            assert!(sm.update().is_empty());
            assert_eq!(sm.sessions(), session);
        }
    }
}
