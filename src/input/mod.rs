pub mod messages;

use crate::util::LatestReceiver;
use messages::{Axis, Button, InputMessage};
use serde::Serialize;
use std::{collections::BTreeSet, time::Duration};
use tokio::time::Instant;
use tracing::{info, warn};

/// Driver sticks and buttons for one cycle, already mapped to robot axes.
///
/// Axes are raw stick values in `[-1, 1]`, `slow` is the trigger depth in
/// `[0, 1]`. Deadband and scaling are applied by the commands.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DriverInput {
    pub translation: f64,
    pub strafe: f64,
    pub rotation: f64,
    pub slow: f64,
    pub buttons: BTreeSet<Button>,
}

impl DriverInput {
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn from_message(message: &InputMessage) -> Self {
        let gamepad = match message.driver() {
            Some(gamepad) => gamepad,
            None => return Self::neutral(),
        };
        Self {
            translation: gamepad.axis(Axis::LeftStickY),
            strafe: -gamepad.axis(Axis::LeftStickX),
            rotation: -gamepad.axis(Axis::RightStickX),
            slow: gamepad.axis(Axis::RightZ).clamp(0.0, 1.0),
            buttons: gamepad
                .button_down
                .iter()
                .filter(|(_, down)| **down)
                .map(|(button, _)| *button)
                .collect(),
        }
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.buttons.contains(&button)
    }
}

/// Watchdog over the gamepad feed. Holds the last message until it is older
/// than the timeout, then reports neutral input.
pub struct DriverInputSource {
    receiver: LatestReceiver<InputMessage>,
    timeout: Duration,
    latest: Option<(Instant, DriverInput)>,
    timed_out: bool,
}

impl DriverInputSource {
    pub fn new(receiver: LatestReceiver<InputMessage>, timeout: Duration) -> Self {
        Self {
            receiver,
            timeout,
            latest: None,
            timed_out: true,
        }
    }

    /// Never waits. Called once per control cycle.
    pub fn poll(&mut self, now: Instant) -> DriverInput {
        match self.receiver.try_recv() {
            Ok(Some(message)) => {
                self.latest = Some((now, DriverInput::from_message(&message)));
            }
            Ok(None) => (),
            Err(err) => {
                if self.latest.take().is_some() {
                    warn!("Gamepad feed closed {:?}", err);
                }
            }
        }

        match &self.latest {
            Some((received, input)) if now.duration_since(*received) <= self.timeout => {
                if self.timed_out {
                    info!("Gamepad input active");
                    self.timed_out = false;
                }
                input.clone()
            }
            _ => {
                if !self.timed_out {
                    warn!(
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Gamepad input timed out, holding neutral"
                    );
                    self.timed_out = true;
                }
                DriverInput::neutral()
            }
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }
}
