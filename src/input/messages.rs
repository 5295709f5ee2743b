use chrono::prelude::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of every gamepad known to the remote controller.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InputMessage {
    pub gamepads: BTreeMap<usize, GamepadMessage>,
    pub time: DateTime<Utc>,
}

impl InputMessage {
    /// The driver is the connected gamepad with the lowest id.
    pub fn driver(&self) -> Option<&GamepadMessage> {
        self.gamepads.values().find(|gamepad| gamepad.connected)
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct GamepadMessage {
    pub name: String,
    pub connected: bool,
    pub last_event_time: DateTime<Utc>,
    #[serde(default)]
    pub button_down_event_counter: BTreeMap<Button, usize>,
    #[serde(default)]
    pub button_up_event_counter: BTreeMap<Button, usize>,
    #[serde(default)]
    pub button_down: BTreeMap<Button, bool>,
    #[serde(default)]
    pub axis_state: BTreeMap<Axis, f32>,
}

impl GamepadMessage {
    pub fn axis(&self, axis: Axis) -> f64 {
        self.axis_state
            .get(&axis)
            .map(|value| f64::from(*value))
            .filter(|value| value.is_finite())
            .unwrap_or_default()
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.button_down.get(&button).cloned().unwrap_or_default()
    }
}

/// Button names as reported by the remote controller. `LeftTrigger` and
/// `RightTrigger` are the bumpers, the analog triggers are `LeftTrigger2` and
/// `RightTrigger2`.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
pub enum Button {
    South,
    East,
    North,
    West,
    C,
    Z,
    LeftTrigger,
    LeftTrigger2,
    RightTrigger,
    RightTrigger2,
    Select,
    Start,
    Mode,
    LeftThumb,
    RightThumb,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    Unknown,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
pub enum Axis {
    LeftStickX,
    LeftStickY,
    LeftZ,
    RightStickX,
    RightStickY,
    RightZ,
    DPadX,
    DPadY,
    Unknown,
}
