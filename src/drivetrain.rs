use crate::{
    configuration::{ConfigError, DrivetrainConfig, VisionConfig},
    context::Alliance,
    driver::{Gyro, SwerveModuleIo},
    geometry::Pose2d,
    kinematics::{
        desaturate_wheel_speeds, ChassisSpeeds, ModulePosition, SwerveKinematics,
        SwerveModuleState, MODULE_COUNT,
    },
    module::{AbsoluteSeed, SwerveModule},
    pose_estimator::{SwervePoseEstimator, VisionMeasurement, VisionTrustLevels},
};
use nalgebra as na;
use std::f64::consts::PI;
use tracing::{info, warn};

/// Owns the four modules, the gyro and the pose estimate.
///
/// Each control cycle calls [`Drivetrain::update_inputs`] before any command
/// runs and [`Drivetrain::write_outputs`] after, so commands always see
/// sensor values from the current cycle.
pub struct Drivetrain {
    modules: [SwerveModule; MODULE_COUNT],
    gyro: Box<dyn Gyro>,
    kinematics: SwerveKinematics,
    estimator: SwervePoseEstimator,
    max_speed: f64,
    max_auto_module_speed: f64,
    max_angular_velocity: f64,
    fast_turn_multiplier: f64,
    last_yaw: f64,
    heading_stale: bool,
}

impl Drivetrain {
    pub fn new(
        config: &DrivetrainConfig,
        vision: &VisionConfig,
        ios: [Box<dyn SwerveModuleIo>; MODULE_COUNT],
        gyro: Box<dyn Gyro>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let constants = config.module_constants()?;
        let kinematics = SwerveKinematics::new(constants.clone().map(|module| module.location))?;

        let mut ios = ios.into_iter();
        let mut modules: Vec<SwerveModule> = Vec::with_capacity(MODULE_COUNT);
        for module_constants in constants {
            let io = ios
                .next()
                .ok_or(ConfigError::WrongModuleCount(modules.len()))?;
            modules.push(SwerveModule::new(
                module_constants,
                &config.module_control,
                config.max_speed,
                io,
            ));
        }
        let modules: [SwerveModule; MODULE_COUNT] = modules
            .try_into()
            .map_err(|modules: Vec<SwerveModule>| ConfigError::WrongModuleCount(modules.len()))?;

        let trust_levels = VisionTrustLevels {
            single_tag: vision.single_tag_std_devs(),
            multi_tag: vision.multi_tag_std_devs(),
        };
        let estimator = SwervePoseEstimator::new(
            kinematics.clone(),
            0.0,
            [ModulePosition::default(); MODULE_COUNT],
            Pose2d::default(),
            vision.state_std_devs,
            trust_levels,
            vision.history_seconds,
        );

        let mut drivetrain = Self {
            modules,
            gyro,
            kinematics,
            estimator,
            max_speed: config.max_speed,
            max_auto_module_speed: config.max_auto_module_speed,
            max_angular_velocity: config.max_angular_velocity,
            fast_turn_multiplier: config.fast_turn_multiplier,
            last_yaw: 0.0,
            heading_stale: false,
        };
        drivetrain.reset_modules_to_absolute();
        let yaw = drivetrain.read_yaw();
        let positions = drivetrain.module_positions();
        drivetrain
            .estimator
            .reset_pose(yaw, positions, Pose2d::default());
        Ok(drivetrain)
    }

    pub fn modules(&self) -> &[SwerveModule; MODULE_COUNT] {
        &self.modules
    }

    pub fn kinematics(&self) -> &SwerveKinematics {
        &self.kinematics
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn max_angular_velocity(&self) -> f64 {
        self.max_angular_velocity
    }

    pub fn fast_turn_multiplier(&self) -> f64 {
        self.fast_turn_multiplier
    }

    pub fn reset_modules_to_absolute(&mut self) -> [AbsoluteSeed; MODULE_COUNT] {
        for module in self.modules.iter_mut() {
            module.refresh();
        }
        let seeds: [AbsoluteSeed; MODULE_COUNT] =
            std::array::from_fn(|index| self.modules[index].reset_to_absolute());
        info!(
            faults = seeds
                .iter()
                .filter(|seed| matches!(seed, AbsoluteSeed::Fallback(_)))
                .count(),
            "Modules reset to absolute"
        );
        seeds
    }

    /// Drives the chassis. Inputs are m/s and rad/s.
    pub fn drive(
        &mut self,
        translation: f64,
        strafe: f64,
        rotation: f64,
        field_relative: bool,
        is_open_loop: bool,
    ) {
        let speeds = if field_relative {
            ChassisSpeeds::from_field_relative(
                translation,
                strafe,
                rotation,
                self.estimator.pose().rotation(),
            )
        } else {
            ChassisSpeeds::new(translation, strafe, rotation)
        };
        let mut states = self.kinematics.to_module_states(speeds);
        desaturate_wheel_speeds(&mut states, self.max_speed);
        self.dispatch(&states, is_open_loop);
    }

    /// Applies module states computed elsewhere, for example by a path follower.
    pub fn set_module_states(
        &mut self,
        mut states: [SwerveModuleState; MODULE_COUNT],
        is_open_loop: bool,
    ) {
        desaturate_wheel_speeds(&mut states, self.max_auto_module_speed);
        self.dispatch(&states, is_open_loop);
    }

    fn dispatch(&mut self, states: &[SwerveModuleState; MODULE_COUNT], is_open_loop: bool) {
        for (module, state) in self.modules.iter_mut().zip(states.iter()) {
            module.set_target(*state, is_open_loop);
        }
    }

    pub fn stop(&mut self) {
        for module in self.modules.iter_mut() {
            module.stop();
        }
    }

    pub fn desired_states(&self) -> [Option<SwerveModuleState>; MODULE_COUNT] {
        std::array::from_fn(|index| self.modules[index].desired_state())
    }

    pub fn module_states(&self) -> [SwerveModuleState; MODULE_COUNT] {
        std::array::from_fn(|index| self.modules[index].state())
    }

    pub fn module_positions(&self) -> [ModulePosition; MODULE_COUNT] {
        std::array::from_fn(|index| self.modules[index].position())
    }

    pub fn chassis_speeds(&self) -> ChassisSpeeds {
        self.kinematics.to_chassis_speeds(&self.module_states())
    }

    /// Field heading in radians, wrapped.
    pub fn heading(&self) -> f64 {
        self.estimator.pose().heading()
    }

    pub fn heading_stale(&self) -> bool {
        self.heading_stale
    }

    pub fn zero_heading(&mut self) {
        self.set_heading(0.0);
    }

    /// Points the heading at the alliance's forward direction.
    pub fn zero_heading_for(&mut self, alliance: Alliance) {
        match alliance {
            Alliance::Blue => self.set_heading(0.0),
            Alliance::Red => self.set_heading(PI),
        }
    }

    fn set_heading(&mut self, heading: f64) {
        let pose = self
            .estimator
            .pose()
            .with_rotation(na::Rotation2::new(heading));
        self.reset_pose(pose);
        info!(heading_degrees = heading.to_degrees(), "Heading zeroed");
    }

    pub fn pose(&self) -> Pose2d {
        self.estimator.pose()
    }

    pub fn reset_pose(&mut self, pose: Pose2d) {
        let positions = self.module_positions();
        self.estimator.reset_pose(self.last_yaw, positions, pose);
    }

    pub fn add_vision_measurement(&mut self, measurement: &VisionMeasurement) -> bool {
        self.estimator.add_vision_measurement(measurement)
    }

    fn read_yaw(&mut self) -> f64 {
        match self.gyro.yaw().filter(|yaw| yaw.is_finite()) {
            Some(yaw) => {
                if self.heading_stale {
                    info!("Gyro reading restored");
                    self.heading_stale = false;
                }
                self.last_yaw = yaw;
            }
            None => {
                if !self.heading_stale {
                    warn!(
                        last_yaw_degrees = self.last_yaw.to_degrees(),
                        "Gyro reading lost, holding last heading"
                    );
                    self.heading_stale = true;
                }
            }
        }
        self.last_yaw
    }

    /// Reads sensors and advances odometry. `now` is the robot clock in seconds.
    pub fn update_inputs(&mut self, now: f64) {
        for module in self.modules.iter_mut() {
            module.refresh();
        }
        let yaw = self.read_yaw();
        let positions = self.module_positions();
        self.estimator.update(now, yaw, positions);
    }

    pub fn write_outputs(&mut self, dt: f64) {
        for module in self.modules.iter_mut() {
            module.write_outputs(dt);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        configuration::tests::default_config,
        driver::{BenchGyro, BenchModuleIo},
        geometry::rotations_to_radians,
        pose_estimator::VisionTrust,
    };
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    pub(crate) const PERIOD: f64 = 0.02;
    const OFFSETS: [f64; MODULE_COUNT] = [-0.349121, -0.232091, 0.175781, 0.068359];

    /// Bench drivetrain whose absolute encoders read exactly the calibration
    /// offsets, so every wheel should seed pointing forward.
    pub(crate) fn bench_drivetrain(gyro: &BenchGyro) -> Drivetrain {
        bench_drivetrain_with(gyro, |io| io)
    }

    /// Like `bench_drivetrain`, with each module's bench IO passed through
    /// `customize` first.
    pub(crate) fn bench_drivetrain_with(
        gyro: &BenchGyro,
        customize: impl Fn(BenchModuleIo) -> BenchModuleIo,
    ) -> Drivetrain {
        let config = default_config();
        let ios: [Box<dyn SwerveModuleIo>; MODULE_COUNT] = OFFSETS.map(|offset| {
            let io = BenchModuleIo::new(PERIOD).with_absolute_rotations(Some(offset));
            Box::new(customize(io)) as Box<dyn SwerveModuleIo>
        });
        Drivetrain::new(
            &config.drivetrain,
            &config.vision,
            ios,
            Box::new(gyro.clone()),
        )
        .unwrap()
    }

    #[test]
    fn offsets_seed_wheels_forward() {
        let gyro = BenchGyro::default();
        let drivetrain = bench_drivetrain(&gyro);
        for module in drivetrain.modules() {
            assert!(module.is_seeded());
            assert!(!module.calibration_fault());
            assert_relative_eq!(module.state().angle, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn encoder_quarter_turn_past_offset_seeds_quarter_turn() {
        let config = default_config();
        let ios: [Box<dyn SwerveModuleIo>; MODULE_COUNT] = OFFSETS.map(|offset| {
            Box::new(BenchModuleIo::new(PERIOD).with_absolute_rotations(Some(offset + 0.25)))
                as Box<dyn SwerveModuleIo>
        });
        let mut drivetrain = Drivetrain::new(
            &config.drivetrain,
            &config.vision,
            ios,
            Box::new(BenchGyro::default()),
        )
        .unwrap();
        let seeds = drivetrain.reset_modules_to_absolute();
        for seed in seeds {
            assert_relative_eq!(seed.angle(), rotations_to_radians(0.25), epsilon = 1e-9);
        }
    }

    #[test]
    fn encoder_retries_until_a_reading_arrives() {
        let gyro = BenchGyro::default();
        // five attempts configured, the fourth one answers
        let drivetrain = bench_drivetrain_with(&gyro, |io| io.with_absolute_failures(3));
        for module in drivetrain.modules() {
            assert!(module.is_seeded());
            assert!(!module.calibration_fault());
            assert_relative_eq!(module.state().angle, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn silent_encoder_flags_fault_until_it_recovers() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain_with(&gyro, |io| io.with_absolute_failures(5));
        for module in drivetrain.modules() {
            assert!(module.is_seeded());
            assert!(module.calibration_fault());
        }

        let seeds = drivetrain.reset_modules_to_absolute();
        for seed in seeds {
            assert!(matches!(seed, AbsoluteSeed::Measured(angle) if angle.abs() < 1e-9));
        }
        assert!(drivetrain
            .modules()
            .iter()
            .all(|module| !module.calibration_fault()));
    }

    #[test]
    fn rotation_on_measured_geometry_is_slower_up_front() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain(&gyro);
        drivetrain.update_inputs(PERIOD);
        drivetrain.drive(0.0, 0.0, 1.0, false, true);
        let speeds: Vec<f64> = drivetrain
            .desired_states()
            .iter()
            .map(|state| state.unwrap().speed.abs())
            .collect();
        let front = f64::hypot(0.13335, 0.263525);
        let rear = drivetrain.kinematics().drive_base_radius();
        assert_relative_eq!(rear, f64::hypot(0.263525, 0.263525), epsilon = 1e-12);
        assert_relative_eq!(speeds[0], front, epsilon = 1e-9);
        assert_relative_eq!(speeds[1], front, epsilon = 1e-9);
        assert_relative_eq!(speeds[2], rear, epsilon = 1e-9);
        assert_relative_eq!(speeds[3], rear, epsilon = 1e-9);

        let states: [SwerveModuleState; MODULE_COUNT] =
            drivetrain.desired_states().map(|state| state.unwrap_or_default());
        let recovered = drivetrain.kinematics().to_chassis_speeds(&states);
        assert_relative_eq!(recovered.vx, 0.0, epsilon = 1e-9);
        assert_relative_eq!(recovered.vy, 0.0, epsilon = 1e-9);
        assert_relative_eq!(recovered.omega, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn straight_drive_gives_equal_forward_speeds() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain(&gyro);
        drivetrain.update_inputs(PERIOD);
        drivetrain.drive(2.0, 0.0, 0.0, false, true);
        for desired in drivetrain.desired_states() {
            let desired = desired.unwrap();
            assert_relative_eq!(desired.speed, 2.0, epsilon = 1e-9);
            assert_relative_eq!(desired.angle, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn field_relative_forward_at_quarter_turn_is_robot_right() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain(&gyro);
        gyro.set_yaw(FRAC_PI_2);
        drivetrain.update_inputs(PERIOD);
        assert_relative_eq!(drivetrain.heading(), FRAC_PI_2, epsilon = 1e-9);

        drivetrain.drive(1.0, 0.0, 0.0, true, true);
        for desired in drivetrain.desired_states() {
            // compare wheel velocity vectors, a flipped wheel is equally valid
            let desired = desired.unwrap();
            let (sin, cos) = desired.angle.sin_cos();
            assert_relative_eq!(desired.speed * cos, 0.0, epsilon = 1e-9);
            assert_relative_eq!(desired.speed * sin, -1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn requests_above_max_speed_are_desaturated() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain(&gyro);
        drivetrain.update_inputs(PERIOD);
        drivetrain.drive(5.0, 0.0, 5.0, false, true);
        let speeds: Vec<f64> = drivetrain
            .desired_states()
            .iter()
            .map(|state| state.unwrap().speed.abs())
            .collect();
        let fastest = speeds.iter().cloned().fold(0.0, f64::max);
        assert_relative_eq!(fastest, drivetrain.max_speed(), epsilon = 1e-9);
    }

    #[test]
    fn external_states_use_auto_ceiling() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain(&gyro);
        drivetrain.update_inputs(PERIOD);
        drivetrain.set_module_states([SwerveModuleState::new(9.0, 0.0); MODULE_COUNT], false);
        for desired in drivetrain.desired_states() {
            assert_relative_eq!(desired.unwrap().speed, 4.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn stop_keeps_wheel_angles() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain(&gyro);
        drivetrain.update_inputs(PERIOD);
        drivetrain.drive(0.0, 1.0, 0.0, false, true);
        drivetrain.stop();
        for desired in drivetrain.desired_states() {
            let desired = desired.unwrap();
            assert_relative_eq!(desired.speed, 0.0);
            assert_relative_eq!(desired.angle, FRAC_PI_2, epsilon = 1e-9);
        }
    }

    #[test]
    fn measured_chassis_speed_follows_bench_modules() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain(&gyro);
        drivetrain.update_inputs(PERIOD);
        drivetrain.drive(1.0, 0.0, 0.0, false, true);
        drivetrain.write_outputs(PERIOD);
        drivetrain.update_inputs(2.0 * PERIOD);
        // bench motors run at free speed for the duty cycle, close to 1 m/s
        let speeds = drivetrain.chassis_speeds();
        assert!((speeds.vx - 1.0).abs() < 0.05);
        assert_relative_eq!(speeds.vy, 0.0, epsilon = 1e-9);
        assert_relative_eq!(speeds.omega, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn heading_freezes_when_gyro_is_lost() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain(&gyro);
        gyro.set_yaw(0.5);
        drivetrain.update_inputs(PERIOD);
        gyro.disconnect();
        drivetrain.update_inputs(2.0 * PERIOD);
        assert!(drivetrain.heading_stale());
        assert_relative_eq!(drivetrain.heading(), 0.5, epsilon = 1e-9);

        gyro.set_yaw(0.6);
        drivetrain.update_inputs(3.0 * PERIOD);
        assert!(!drivetrain.heading_stale());
        assert_relative_eq!(drivetrain.heading(), 0.6, epsilon = 1e-9);
    }

    #[test]
    fn zero_heading_keeps_translation() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain(&gyro);
        drivetrain.reset_pose(Pose2d::new((1.5, -2.0), 1.0));
        gyro.set_yaw(0.3);
        drivetrain.update_inputs(PERIOD);
        drivetrain.zero_heading_for(Alliance::Red);
        assert_relative_eq!(drivetrain.heading().abs(), PI, epsilon = 1e-9);
        assert_relative_eq!(drivetrain.pose().x(), 1.5, epsilon = 1e-9);
        drivetrain.zero_heading();
        drivetrain.update_inputs(2.0 * PERIOD);
        assert_relative_eq!(drivetrain.heading(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(drivetrain.pose().y(), -2.0, epsilon = 1e-9);
    }

    #[test]
    fn bench_robot_drives_forward() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain(&gyro);
        for step in 1..=50 {
            drivetrain.update_inputs(step as f64 * PERIOD);
            drivetrain.drive(1.0, 0.0, 0.0, true, true);
            drivetrain.write_outputs(PERIOD);
        }
        assert!(drivetrain.pose().x() > 0.5);
        assert_relative_eq!(drivetrain.pose().y(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn vision_fix_moves_pose() {
        let gyro = BenchGyro::default();
        let mut drivetrain = bench_drivetrain(&gyro);
        drivetrain.update_inputs(PERIOD);
        assert!(drivetrain.add_vision_measurement(&VisionMeasurement {
            pose: Pose2d::new((1.0, 1.0), 0.0),
            timestamp: PERIOD,
            trust: VisionTrust::MultiTag,
        }));
        assert!(drivetrain.pose().x() > 0.5);
    }
}
