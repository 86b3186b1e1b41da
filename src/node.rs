//! Node loop
//!
//! Top-level driver of the PC-Table node. Each pass runs to completion in a
//! fixed order:
//!
//! 1. poll the local input devices (encoders)
//! 2. link maintenance
//! 3. bus session: reconnect if due, dispatch inbound commands
//! 4. liveness publisher, then measurement publisher
//!
//! The loop never fails; every error is handled and logged by the component
//! that hit it.

use embassy_time::Instant;
use log::debug;

use crate::config::NodeConfig;
use crate::dispatcher::{CommandDispatcher, DispatchOutcome};
use crate::encoder::{InputDevice, RotaryMove};
use crate::link::LinkLayer;
use crate::publisher::{
    LivenessPublisher, MeasurementPublisher, PublishOutcome, SensorSource,
};
use crate::session::{BusSession, BusTransport, ReconnectOutcome};
use crate::state::{INPUT_DEVICES, NodeState};
use crate::ConfigError;

/// What happened during one pass, for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub moves: [RotaryMove; INPUT_DEVICES],
    pub link_up: bool,
    /// `None` when the link was down and the bus steps were skipped
    pub reconnect: Option<ReconnectOutcome>,
    pub commands_applied: usize,
    pub commands_rejected: usize,
    pub liveness: PublishOutcome,
    pub measurement: PublishOutcome,
}

/// The PC-Table node
pub struct Node<L, T, S, E> {
    link: L,
    session: BusSession<T>,
    dispatcher: CommandDispatcher,
    liveness: LivenessPublisher,
    measurement: MeasurementPublisher<S>,
    inputs: [E; INPUT_DEVICES],
    state: NodeState,
    boot: Instant,
}

impl<L, T, S, E> Node<L, T, S, E>
where
    L: LinkLayer,
    T: BusTransport,
    S: SensorSource,
    E: InputDevice,
{
    /// Assemble a node booted at `now`
    pub fn new(
        config: &NodeConfig,
        link: L,
        transport: T,
        sensor: S,
        inputs: [E; INPUT_DEVICES],
        now: Instant,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            link,
            session: BusSession::new(transport, config)?,
            dispatcher: CommandDispatcher::new(config),
            liveness: LivenessPublisher::new(config, now)?,
            measurement: MeasurementPublisher::new(sensor, config, now)?,
            inputs,
            state: NodeState::for_config(config),
            boot: now,
        })
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn session(&self) -> &BusSession<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut BusSession<T> {
        &mut self.session
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        self.measurement.sensor_mut()
    }

    pub fn inputs_mut(&mut self) -> &mut [E; INPUT_DEVICES] {
        &mut self.inputs
    }

    /// Run one pass of the node loop at `now`
    pub async fn run_once(&mut self, now: Instant) -> PassReport {
        // 1. Local input devices
        let mut moves = [RotaryMove::None; INPUT_DEVICES];
        for (index, input) in self.inputs.iter_mut().enumerate() {
            let mv = input.poll();
            if mv != RotaryMove::None {
                debug!("[NODE] Input {} moved: {:?}", index, mv);
            }
            self.state.inputs[index].record(mv);
            moves[index] = mv;
        }

        if let Some(uptime) = now.checked_duration_since(self.boot) {
            self.state.uptime = uptime;
        }

        // 2. Link maintenance
        self.link.maintain(now);
        let link_up = self.link.is_link_up();

        let mut report = PassReport {
            moves,
            link_up,
            reconnect: None,
            commands_applied: 0,
            commands_rejected: 0,
            liveness: PublishOutcome::Idle,
            measurement: PublishOutcome::Idle,
        };

        if !link_up {
            return report;
        }

        // 3. Bus session
        report.reconnect = Some(self.session.reconnect(link_up, now).await);

        for message in self.session.poll_inbound().await {
            match self
                .dispatcher
                .on_message(&mut self.state, &message.topic, &message.payload)
            {
                DispatchOutcome::Applied(_) => report.commands_applied += 1,
                DispatchOutcome::Invalid => report.commands_rejected += 1,
                DispatchOutcome::Ignored => {}
            }
        }

        // 4. Publishers, fixed order
        report.liveness = self.liveness.run(now, &self.state, &mut self.session).await;
        report.measurement = self
            .measurement
            .run(now, &mut self.state, &mut self.session)
            .await;

        report
    }
}
