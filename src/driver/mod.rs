pub mod bench_driver;

pub use bench_driver::{BenchGyro, BenchModuleIo};

/// Raw sensor values of one module, in motor rotor units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModuleIoReadings {
    pub drive_position_rotations: f64,
    pub drive_velocity_rps: f64,
    pub angle_position_rotations: f64,
    pub drive_supply_current: f64,
    pub drive_stator_current: f64,
    pub angle_supply_current: f64,
    pub angle_stator_current: f64,
}

/// Hardware boundary of one swerve module: drive motor, steering motor and
/// absolute steering encoder.
///
/// Implementations must not block; readings are expected to come from cached
/// status frames. `absolute_rotations` is the exception, it only runs while
/// seeding.
pub trait SwerveModuleIo: Send {
    fn read(&mut self) -> ModuleIoReadings;

    /// Absolute wheel angle in rotations, `None` if the encoder has no valid
    /// reading right now.
    ///
    /// Called back to back when seeding the steering sensor, so every call
    /// must request a new measurement from the encoder. Returning the same
    /// cached frame makes the retries useless. Hardware that needs time
    /// between requests may wait here, at most one status frame period.
    fn absolute_rotations(&mut self) -> Option<f64>;

    /// Open loop drive output in `[-1, 1]`.
    fn set_drive_duty_cycle(&mut self, duty_cycle: f64);

    fn set_drive_voltage(&mut self, volts: f64);

    fn set_angle_voltage(&mut self, volts: f64);

    /// Overwrites the relative steering sensor position.
    fn seed_angle_position(&mut self, rotor_rotations: f64);
}

/// Heading source.
pub trait Gyro: Send {
    /// Counter-clockwise positive yaw in radians, `None` when disconnected.
    fn yaw(&mut self) -> Option<f64>;
}
