//! State shared between commands, owned by the control loop.

use crate::{drivetrain::Drivetrain, error::RobotError, input::DriverInput};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alliance {
    Blue,
    Red,
}

/// Operator toggles read by commands every cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeSettings {
    pub fast_turn: bool,
    pub robot_centric: bool,
}

impl RuntimeSettings {
    /// Rotation ceiling for this cycle, `base` scaled when fast turn is held.
    pub fn max_angular_velocity(&self, base: f64, fast_turn_multiplier: f64) -> f64 {
        if self.fast_turn {
            base * fast_turn_multiplier
        } else {
            base
        }
    }
}

/// Match level information coming from outside the robot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GameState {
    pub alliance: Option<Alliance>,
    /// Field heading in radians the robot should aim at.
    pub aim_heading: Option<f64>,
}

/// What the robot itself reports about its readiness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RobotState {
    pub turn_on_target: bool,
}

pub struct RobotContext {
    pub drivetrain: Drivetrain,
    pub driver: DriverInput,
    pub settings: RuntimeSettings,
    pub game_state: GameState,
    pub robot_state: RobotState,
    initialized: bool,
}

impl RobotContext {
    pub fn new(drivetrain: Drivetrain, alliance: Option<Alliance>) -> Self {
        Self {
            drivetrain,
            driver: DriverInput::neutral(),
            settings: RuntimeSettings::default(),
            game_state: GameState {
                alliance,
                aim_heading: None,
            },
            robot_state: RobotState::default(),
            initialized: false,
        }
    }

    /// Second construction phase. Points the heading at the alliance forward
    /// direction once everything is wired.
    pub fn initialize(&mut self) -> Result<(), RobotError> {
        if self.initialized {
            return Err(RobotError::AlreadyInitialized);
        }
        self.zero_heading();
        self.initialized = true;
        info!(alliance = ?self.game_state.alliance, "Robot context initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn ensure_initialized(&self) -> Result<(), RobotError> {
        if self.initialized {
            Ok(())
        } else {
            Err(RobotError::NotInitialized)
        }
    }

    /// Zeroes the heading toward the alliance forward direction if known.
    pub fn zero_heading(&mut self) {
        match self.game_state.alliance {
            Some(alliance) => self.drivetrain.zero_heading_for(alliance),
            None => self.drivetrain.zero_heading(),
        }
    }
}
