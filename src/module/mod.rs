pub mod current_limit;

use crate::{
    driver::{ModuleIoReadings, SwerveModuleIo},
    geometry::{inches_to_meters, radians_to_rotations, rotations_to_radians, wrap_angle},
    kinematics::{ModulePosition, SwerveModuleState},
    pid::{FeedforwardGains, PidController, PidGains, SimpleMotorFeedforward},
};
use current_limit::{CurrentLimitConfig, CurrentLimiter};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, info, warn};

pub const NOMINAL_VOLTAGE: f64 = 12.0;

/// Below this fraction of max speed the wheel keeps its last heading.
const ANGLE_HOLD_FRACTION: f64 = 0.01;

/// Identity and calibration of one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleConstants {
    pub name: String,
    pub drive_motor_id: u32,
    pub angle_motor_id: u32,
    pub encoder_id: u32,
    /// Absolute encoder reading that corresponds to the wheel pointing forward,
    /// radians wrapped into `[-π, π)`.
    pub angle_offset: f64,
    /// Metres from the robot centre, x forward, y left.
    pub location: na::Vector2<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GearModel {
    pub wheel_circumference: f64,
    pub drive_gear_ratio: f64,
    pub angle_gear_ratio: f64,
}

impl Default for GearModel {
    /// MK4i with L2 drive gearing and a 4" wheel.
    fn default() -> Self {
        Self {
            wheel_circumference: inches_to_meters(4.0) * PI,
            drive_gear_ratio: 6.75,
            angle_gear_ratio: 150.0 / 7.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModuleControlConfig {
    #[serde(default)]
    pub gear: GearModel,
    pub drive_gains: PidGains,
    pub drive_feedforward: FeedforwardGains,
    pub angle_gains: PidGains,
    #[serde(default)]
    pub drive_current_limit: CurrentLimitConfig,
    #[serde(default)]
    pub angle_current_limit: CurrentLimitConfig,
    #[serde(default = "default_encoder_retries")]
    pub encoder_retries: u32,
}

fn default_encoder_retries() -> u32 {
    5
}

/// Outcome of seeding the steering sensor from the absolute encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AbsoluteSeed {
    Measured(f64),
    /// Encoder never answered; seeded from the last good reading or straight ahead.
    Fallback(f64),
}

impl AbsoluteSeed {
    pub fn angle(&self) -> f64 {
        match self {
            AbsoluteSeed::Measured(angle) | AbsoluteSeed::Fallback(angle) => *angle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DriveTarget {
    /// Continuous steering angle in radians.
    angle: f64,
    speed: f64,
    open_loop: bool,
}

pub struct SwerveModule {
    constants: ModuleConstants,
    gear: GearModel,
    io: Box<dyn SwerveModuleIo>,
    angle_pid: PidController,
    drive_pid: PidController,
    drive_feedforward: SimpleMotorFeedforward,
    drive_limiter: CurrentLimiter,
    angle_limiter: CurrentLimiter,
    max_speed: f64,
    encoder_retries: u32,
    readings: ModuleIoReadings,
    target: Option<DriveTarget>,
    last_absolute_rotations: Option<f64>,
    seeded: bool,
    calibration_fault: bool,
}

impl SwerveModule {
    pub fn new(
        constants: ModuleConstants,
        config: &ModuleControlConfig,
        max_speed: f64,
        io: Box<dyn SwerveModuleIo>,
    ) -> Self {
        Self {
            constants,
            gear: config.gear,
            io,
            angle_pid: PidController::new(config.angle_gains).with_output_limit(NOMINAL_VOLTAGE),
            drive_pid: PidController::new(config.drive_gains),
            drive_feedforward: SimpleMotorFeedforward::new(config.drive_feedforward),
            drive_limiter: CurrentLimiter::new(config.drive_current_limit),
            angle_limiter: CurrentLimiter::new(config.angle_current_limit),
            max_speed,
            encoder_retries: config.encoder_retries,
            readings: ModuleIoReadings::default(),
            target: None,
            last_absolute_rotations: None,
            seeded: false,
            calibration_fault: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.constants.name
    }

    pub fn constants(&self) -> &ModuleConstants {
        &self.constants
    }

    /// Pulls fresh sensor values from the hardware. Called once per cycle.
    pub fn refresh(&mut self) {
        self.readings = self.io.read();
    }

    /// Unwrapped steering angle in radians.
    pub fn continuous_angle(&self) -> f64 {
        rotations_to_radians(self.readings.angle_position_rotations / self.gear.angle_gear_ratio)
    }

    pub fn drive_velocity(&self) -> f64 {
        self.readings.drive_velocity_rps / self.gear.drive_gear_ratio * self.gear.wheel_circumference
    }

    pub fn drive_distance(&self) -> f64 {
        self.readings.drive_position_rotations / self.gear.drive_gear_ratio
            * self.gear.wheel_circumference
    }

    pub fn state(&self) -> SwerveModuleState {
        SwerveModuleState::new(self.drive_velocity(), self.continuous_angle())
    }

    pub fn position(&self) -> ModulePosition {
        ModulePosition::new(self.drive_distance(), self.continuous_angle())
    }

    /// Last accepted target, angle wrapped.
    pub fn desired_state(&self) -> Option<SwerveModuleState> {
        self.target
            .map(|target| SwerveModuleState::new(target.speed, target.angle))
    }

    pub fn set_target(&mut self, desired: SwerveModuleState, is_open_loop: bool) {
        let current = self.continuous_angle();
        let optimized = desired.optimize(current);
        let angle = if optimized.speed.abs() <= self.max_speed * ANGLE_HOLD_FRACTION {
            self.target.map(|target| target.angle).unwrap_or(current)
        } else {
            optimized.angle
        };
        self.target = Some(DriveTarget {
            angle,
            speed: optimized.speed,
            open_loop: is_open_loop,
        });
    }

    /// Zero drive output, wheel keeps its heading.
    pub fn stop(&mut self) {
        let angle = self
            .target
            .map(|target| target.angle)
            .unwrap_or_else(|| self.continuous_angle());
        self.target = Some(DriveTarget {
            angle,
            speed: 0.0,
            open_loop: true,
        });
    }

    /// Re-seeds the relative steering sensor from the absolute encoder.
    pub fn reset_to_absolute(&mut self) -> AbsoluteSeed {
        let attempts = self.encoder_retries.max(1);
        let mut measured = None;
        for attempt in 1..=attempts {
            match self.io.absolute_rotations().filter(|rotations| rotations.is_finite()) {
                Some(rotations) => {
                    measured = Some(rotations);
                    break;
                }
                None => debug!(
                    module = %self.constants.name,
                    attempt,
                    "Absolute encoder returned no reading"
                ),
            }
        }

        let seed = match measured {
            Some(rotations) => {
                self.last_absolute_rotations = Some(rotations);
                self.calibration_fault = false;
                AbsoluteSeed::Measured(self.angle_from_absolute(rotations))
            }
            None => {
                let fallback = self
                    .last_absolute_rotations
                    .map(|rotations| self.angle_from_absolute(rotations))
                    .unwrap_or(0.0);
                self.calibration_fault = true;
                warn!(
                    module = %self.constants.name,
                    encoder_id = self.constants.encoder_id,
                    attempts,
                    fallback_degrees = fallback.to_degrees(),
                    "Absolute encoder unavailable, steering angle may be misaligned"
                );
                AbsoluteSeed::Fallback(fallback)
            }
        };

        self.seed_angle(seed.angle());
        info!(
            module = %self.constants.name,
            angle_degrees = seed.angle().to_degrees(),
            "Steering sensor seeded"
        );
        seed
    }

    fn angle_from_absolute(&self, rotations: f64) -> f64 {
        wrap_angle(rotations_to_radians(rotations) - self.constants.angle_offset)
    }

    fn seed_angle(&mut self, angle: f64) {
        let rotor_rotations = radians_to_rotations(angle) * self.gear.angle_gear_ratio;
        self.io.seed_angle_position(rotor_rotations);
        self.readings.angle_position_rotations = rotor_rotations;
        self.angle_pid.reset();
        self.target = None;
        self.seeded = true;
    }

    /// Runs the steering and drive loops against the latest readings.
    pub fn write_outputs(&mut self, dt: f64) {
        let target = match self.target {
            Some(target) if self.seeded => target,
            _ => {
                self.io.set_drive_duty_cycle(0.0);
                self.io.set_angle_voltage(0.0);
                return;
            }
        };

        let angle_volts = self
            .angle_pid
            .calculate(self.continuous_angle(), target.angle, dt);
        let angle_scale = self.angle_limiter.update(
            self.readings.angle_supply_current,
            self.readings.angle_stator_current,
            dt,
        );
        self.io.set_angle_voltage(angle_volts * angle_scale);

        let drive_scale = self.drive_limiter.update(
            self.readings.drive_supply_current,
            self.readings.drive_stator_current,
            dt,
        );
        if target.open_loop {
            let duty_cycle = (target.speed / self.max_speed).clamp(-1.0, 1.0);
            self.io.set_drive_duty_cycle(duty_cycle * drive_scale);
        } else {
            let measured = self.drive_velocity();
            let volts = self.drive_feedforward.calculate(target.speed)
                + self.drive_pid.calculate(measured, target.speed, dt);
            self.io
                .set_drive_voltage(volts.clamp(-NOMINAL_VOLTAGE, NOMINAL_VOLTAGE) * drive_scale);
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn calibration_fault(&self) -> bool {
        self.calibration_fault
    }

    pub fn drive_limit_trips(&self) -> u32 {
        self.drive_limiter.trip_count()
    }

    pub fn angle_limit_trips(&self) -> u32 {
        self.angle_limiter.trip_count()
    }

    pub fn is_current_limited(&self) -> bool {
        self.drive_limiter.is_limiting() || self.angle_limiter.is_limiting()
    }
}
