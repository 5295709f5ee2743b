use config::Config;
use nalgebra as na;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::*;

use crate::{
    context::Alliance,
    error::ErrorWrapper,
    geometry::{rotations_to_radians, wrap_angle},
    kinematics::{KinematicsError, SwerveKinematics, MODULE_COUNT},
    module::{ModuleConstants, ModuleControlConfig},
    pid::PidGains,
    pose_estimator::StdDevs,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("expected 4 swerve modules, found {0}")]
    WrongModuleCount(usize),
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("invalid module geometry")]
    Kinematics(#[from] KinematicsError),
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub drivetrain: DrivetrainConfig,
    pub teleop: TeleopConfig,
    pub turn_in_place: TurnInPlaceConfig,
    pub vision: VisionConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub zenoh: SwerveZenohConfig,
}

impl AppConfig {
    pub fn load_config(config: &Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = if let Some(config) = config {
            info!("Using configuration from {:?}", config);
            Config::builder()
                .add_source(config::Environment::with_prefix("APP"))
                .add_source(config::File::with_name(
                    config
                        .to_str()
                        .ok_or_else(|| anyhow::anyhow!("Failed to convert path"))?,
                ))
                .build()?
        } else {
            info!("Using dev configuration");
            Config::builder()
                .add_source(config::Environment::with_prefix("APP"))
                .add_source(config::File::with_name("config/settings"))
                .add_source(config::File::with_name("config/dev_settings").required(false))
                .build()?
        };

        let app_config: AppConfig = settings.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.drivetrain.validate()?;
        if self.runtime.control_period_ms == 0 {
            return Err(ConfigError::NotPositive("runtime.control_period_ms"));
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct DrivetrainConfig {
    /// m/s
    pub max_speed: f64,
    /// m/s, module ceiling for externally generated module states
    pub max_auto_module_speed: f64,
    /// rad/s
    pub max_angular_velocity: f64,
    #[serde(default = "default_fast_turn_multiplier")]
    pub fast_turn_multiplier: f64,
    /// CAN id of the gyro.
    #[serde(default)]
    pub gyro_id: u32,
    pub module_control: ModuleControlConfig,
    pub modules: Vec<ModuleConfig>,
}

fn default_fast_turn_multiplier() -> f64 {
    2.0
}

impl DrivetrainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            (self.max_speed, "drivetrain.max_speed"),
            (self.max_auto_module_speed, "drivetrain.max_auto_module_speed"),
            (self.max_angular_velocity, "drivetrain.max_angular_velocity"),
            (
                self.module_control.gear.wheel_circumference,
                "drivetrain.module_control.gear.wheel_circumference",
            ),
            (
                self.module_control.gear.drive_gear_ratio,
                "drivetrain.module_control.gear.drive_gear_ratio",
            ),
            (
                self.module_control.gear.angle_gear_ratio,
                "drivetrain.module_control.gear.angle_gear_ratio",
            ),
        ];
        for (value, name) in positive {
            if value.is_nan() || value <= 0.0 {
                return Err(ConfigError::NotPositive(name));
            }
        }
        let constants = self.module_constants()?;
        SwerveKinematics::new(constants.map(|module| module.location))?;
        Ok(())
    }

    /// Module identity and calibration in front-left, front-right,
    /// back-left, back-right order.
    pub fn module_constants(&self) -> Result<[ModuleConstants; MODULE_COUNT], ConfigError> {
        let constants: Vec<ModuleConstants> =
            self.modules.iter().map(ModuleConfig::to_constants).collect();
        constants
            .try_into()
            .map_err(|modules: Vec<ModuleConstants>| ConfigError::WrongModuleCount(modules.len()))
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ModuleConfig {
    pub name: String,
    pub drive_motor_id: u32,
    pub angle_motor_id: u32,
    pub encoder_id: u32,
    /// Calibration offset of the absolute encoder, in rotations.
    pub angle_offset: f64,
    /// `[x, y]` in metres from the robot centre.
    pub location: [f64; 2],
}

impl ModuleConfig {
    pub fn to_constants(&self) -> ModuleConstants {
        ModuleConstants {
            name: self.name.clone(),
            drive_motor_id: self.drive_motor_id,
            angle_motor_id: self.angle_motor_id,
            encoder_id: self.encoder_id,
            angle_offset: wrap_angle(rotations_to_radians(self.angle_offset)),
            location: na::Vector2::new(self.location[0], self.location[1]),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputCurve {
    #[default]
    Linear,
    Squared,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TeleopConfig {
    pub stick_deadband: f64,
    #[serde(default)]
    pub input_curve: InputCurve,
    /// Speed multiplier with the slow trigger fully held.
    pub slow_move_modifier: f64,
    pub slow_turn_modifier: f64,
    #[serde(default = "default_input_timeout_ms")]
    pub input_timeout_ms: u64,
}

fn default_input_timeout_ms() -> u64 {
    250
}

impl TeleopConfig {
    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            stick_deadband: 0.1,
            input_curve: InputCurve::Linear,
            slow_move_modifier: 0.8,
            slow_turn_modifier: 0.8,
            input_timeout_ms: default_input_timeout_ms(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct TurnInPlaceConfig {
    pub gains: PidGains,
    pub tolerance_degrees: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct VisionConfig {
    pub single_tag_xy: f64,
    pub multi_tag_xy: f64,
    pub tag_rotation_degrees: f64,
    /// Trust placed in wheel odometry, same units as the vision deviations.
    pub state_std_devs: StdDevs,
    #[serde(default = "default_history_seconds")]
    pub history_seconds: f64,
}

fn default_history_seconds() -> f64 {
    1.5
}

impl VisionConfig {
    pub fn single_tag_std_devs(&self) -> StdDevs {
        StdDevs::new(
            self.single_tag_xy,
            self.single_tag_xy,
            self.tag_rotation_degrees.to_radians(),
        )
    }

    pub fn multi_tag_std_devs(&self) -> StdDevs {
        StdDevs::new(
            self.multi_tag_xy,
            self.multi_tag_xy,
            self.tag_rotation_degrees.to_radians(),
        )
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_control_period_ms")]
    pub control_period_ms: u64,
    #[serde(default)]
    pub alliance: Option<Alliance>,
}

fn default_control_period_ms() -> u64 {
    20
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            control_period_ms: default_control_period_ms(),
            alliance: None,
        }
    }
}

impl RuntimeConfig {
    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SwerveZenohConfig {
    #[serde(default)]
    pub connect: Vec<zenoh_config::EndPoint>,
    #[serde(default)]
    pub listen: Vec<zenoh_config::EndPoint>,
    #[serde(default)]
    pub config_path: Option<String>,
}

impl SwerveZenohConfig {
    pub fn get_zenoh_config(&self) -> anyhow::Result<zenoh::config::Config> {
        let mut config = if let Some(conf_file) = &self.config_path {
            zenoh::config::Config::from_file(conf_file).map_err(ErrorWrapper::ZenohError)?
        } else {
            zenoh::config::Config::default()
        };
        if !self.connect.is_empty() {
            config.connect.endpoints.clone_from(&self.connect);
        }
        if !self.listen.is_empty() {
            config.listen.endpoints.clone_from(&self.listen);
        }
        Ok(config)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) static DEFAULT_CONFIG: &str = include_str!("../config/settings.yaml");

    pub(crate) fn default_config() -> AppConfig {
        Config::builder()
            .add_source(config::File::from_str(
                DEFAULT_CONFIG,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap()
            .try_deserialize::<AppConfig>()
            .unwrap()
    }

    #[test]
    fn test_config() {
        let config = default_config();
        config.validate().unwrap();
        assert_eq!(config.runtime.control_period(), Duration::from_millis(20));
    }

    #[test]
    fn offsets_are_loaded_as_wrapped_radians() {
        let config = default_config();
        let constants = config.drivetrain.module_constants().unwrap();
        let names: Vec<&str> = constants.iter().map(|module| module.name.as_str()).collect();
        assert_eq!(names, ["front_left", "front_right", "back_left", "back_right"]);
        assert_relative_eq!(
            constants[0].angle_offset,
            rotations_to_radians(-0.349121),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            constants[3].angle_offset,
            rotations_to_radians(0.068359),
            epsilon = 1e-12
        );
        assert_eq!(constants[1].drive_motor_id, 19);
    }

    #[test]
    fn front_modules_sit_closer_to_centre() {
        let config = default_config();
        assert_eq!(config.drivetrain.gyro_id, 0);
        let constants = config.drivetrain.module_constants().unwrap();
        let front_left = constants[0].location;
        let back_right = constants[3].location;
        assert_relative_eq!(front_left.x, 0.13335, epsilon = 1e-12);
        assert_relative_eq!(front_left.y, 0.263525, epsilon = 1e-12);
        assert_relative_eq!(back_right.x, -0.263525, epsilon = 1e-12);
        assert_relative_eq!(back_right.y, -0.263525, epsilon = 1e-12);
    }

    #[test]
    fn three_modules_is_rejected() {
        let mut config = default_config();
        config.drivetrain.modules.pop();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WrongModuleCount(3))
        ));
    }

    #[test]
    fn non_positive_speed_is_rejected() {
        let mut config = default_config();
        config.drivetrain.max_speed = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive("drivetrain.max_speed"))
        ));
    }

    #[test]
    fn collapsed_geometry_is_rejected() {
        let mut config = default_config();
        for module in config.drivetrain.modules.iter_mut() {
            module.location = [0.0, 0.0];
        }
        assert!(matches!(config.validate(), Err(ConfigError::Kinematics(_))));
    }

    #[test]
    fn vision_trust_levels() {
        let config = default_config();
        let single = config.vision.single_tag_std_devs();
        let multi = config.vision.multi_tag_std_devs();
        assert!(single.x < multi.x);
        assert_relative_eq!(single.theta, 40_f64.to_radians());
    }
}
