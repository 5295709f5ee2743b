//! Feedback and feedforward controllers shared by the module loops and the
//! heading controller.

use crate::geometry::wrap_angle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
}

impl PidGains {
    pub fn p(kp: f64) -> Self {
        Self {
            kp,
            ..Default::default()
        }
    }

    pub fn pid(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }
}

/// Static friction and velocity gains, in volts and volts per m/s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedforwardGains {
    pub ks: f64,
    pub kv: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SimpleMotorFeedforward {
    gains: FeedforwardGains,
}

impl SimpleMotorFeedforward {
    pub fn new(gains: FeedforwardGains) -> Self {
        Self { gains }
    }

    pub fn calculate(&self, velocity: f64) -> f64 {
        let direction = if velocity > 0.0 {
            1.0
        } else if velocity < 0.0 {
            -1.0
        } else {
            0.0
        };
        self.gains.ks * direction + self.gains.kv * velocity
    }
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    /// Treat the error as an angle in radians and take the short way around.
    continuous: bool,
    integral: f64,
    output_limit: Option<f64>,
    tolerance: f64,
    previous_error: Option<f64>,
}

impl PidController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            continuous: false,
            integral: 0.0,
            output_limit: None,
            tolerance: 0.0,
            previous_error: None,
        }
    }

    pub fn with_continuous_angle(mut self) -> Self {
        self.continuous = true;
        self
    }

    pub fn with_output_limit(mut self, limit: f64) -> Self {
        self.output_limit = Some(limit.abs());
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = None;
    }

    /// True once the last computed error is inside the tolerance.
    pub fn at_setpoint(&self) -> bool {
        self.previous_error
            .map(|error| error.abs() <= self.tolerance)
            .unwrap_or(false)
    }

    pub fn calculate(&mut self, measurement: f64, setpoint: f64, dt: f64) -> f64 {
        let error = if self.continuous {
            wrap_angle(setpoint - measurement)
        } else {
            setpoint - measurement
        };

        if self.gains.ki != 0.0 && dt > 0.0 {
            self.integral += error * dt;
        }
        let derivative = match self.previous_error {
            Some(previous) if dt > 0.0 => (error - previous) / dt,
            _ => 0.0,
        };
        self.previous_error = Some(error);

        let output =
            self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;
        match self.output_limit {
            Some(limit) => output.clamp(-limit, limit),
            None => output,
        }
    }
}
