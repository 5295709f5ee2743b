//! Hardware stand-ins for running the control loop on a bench with no robot
//! attached. Outputs are followed ideally, there is no motor model.

use super::{Gyro, ModuleIoReadings, SwerveModuleIo};
use crate::module::NOMINAL_VOLTAGE;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Free speed of a Falcon 500 rotor at nominal voltage.
pub const FALCON_FREE_SPEED_RPS: f64 = 6380.0 / 60.0;

#[derive(Debug, Clone)]
pub struct BenchModuleIo {
    readings: ModuleIoReadings,
    period: f64,
    drive_demand_rps: f64,
    angle_demand_rps: f64,
    absolute_rotations: Option<f64>,
    absolute_failures: u32,
}

impl BenchModuleIo {
    /// `period` is the time in seconds between consecutive `read` calls.
    pub fn new(period: f64) -> Self {
        Self {
            readings: ModuleIoReadings::default(),
            period,
            drive_demand_rps: 0.0,
            angle_demand_rps: 0.0,
            absolute_rotations: Some(0.0),
            absolute_failures: 0,
        }
    }

    pub fn with_absolute_rotations(mut self, rotations: Option<f64>) -> Self {
        self.absolute_rotations = rotations;
        self
    }

    /// Makes the next `failures` absolute encoder reads come back empty.
    pub fn with_absolute_failures(mut self, failures: u32) -> Self {
        self.absolute_failures = failures;
        self
    }

    pub fn with_currents(mut self, drive_supply: f64, drive_stator: f64) -> Self {
        self.readings.drive_supply_current = drive_supply;
        self.readings.drive_stator_current = drive_stator;
        self
    }
}

fn demand_from_voltage(volts: f64) -> f64 {
    (volts / NOMINAL_VOLTAGE).clamp(-1.0, 1.0) * FALCON_FREE_SPEED_RPS
}

impl SwerveModuleIo for BenchModuleIo {
    fn read(&mut self) -> ModuleIoReadings {
        self.readings.drive_velocity_rps = self.drive_demand_rps;
        self.readings.drive_position_rotations += self.drive_demand_rps * self.period;
        self.readings.angle_position_rotations += self.angle_demand_rps * self.period;
        self.readings
    }

    fn absolute_rotations(&mut self) -> Option<f64> {
        if self.absolute_failures > 0 {
            self.absolute_failures -= 1;
            return None;
        }
        self.absolute_rotations
    }

    fn set_drive_duty_cycle(&mut self, duty_cycle: f64) {
        self.drive_demand_rps = duty_cycle.clamp(-1.0, 1.0) * FALCON_FREE_SPEED_RPS;
    }

    fn set_drive_voltage(&mut self, volts: f64) {
        self.drive_demand_rps = demand_from_voltage(volts);
    }

    fn set_angle_voltage(&mut self, volts: f64) {
        self.angle_demand_rps = demand_from_voltage(volts);
    }

    fn seed_angle_position(&mut self, rotor_rotations: f64) {
        self.readings.angle_position_rotations = rotor_rotations;
    }
}

/// Gyro whose yaw is set from outside. Clones share the same reading.
#[derive(Debug, Clone)]
pub struct BenchGyro {
    yaw_bits: Arc<AtomicU64>,
}

impl Default for BenchGyro {
    fn default() -> Self {
        Self {
            yaw_bits: Arc::new(AtomicU64::new(0.0_f64.to_bits())),
        }
    }
}

impl BenchGyro {
    pub fn set_yaw(&self, yaw: f64) {
        self.yaw_bits.store(yaw.to_bits(), Ordering::Relaxed);
    }

    pub fn disconnect(&self) {
        self.yaw_bits.store(f64::NAN.to_bits(), Ordering::Relaxed);
    }
}

impl Gyro for BenchGyro {
    fn yaw(&mut self) -> Option<f64> {
        let yaw = f64::from_bits(self.yaw_bits.load(Ordering::Relaxed));
        yaw.is_finite().then_some(yaw)
    }
}
