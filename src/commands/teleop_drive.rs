use super::{Command, Subsystem};
use crate::{
    configuration::{InputCurve, TeleopConfig},
    context::RobotContext,
};

/// Continuous deadband: zero inside `deadband`, then rescaled so the output
/// still reaches ±1 at full stick.
pub fn apply_deadband(value: f64, deadband: f64) -> f64 {
    let value = value.clamp(-1.0, 1.0);
    let magnitude = value.abs();
    if magnitude <= deadband {
        0.0
    } else {
        value.signum() * (magnitude - deadband) / (1.0 - deadband)
    }
}

pub fn shape_input(value: f64, curve: InputCurve) -> f64 {
    match curve {
        InputCurve::Linear => value,
        InputCurve::Squared => value * value.abs(),
    }
}

/// Speed multiplier for a slow trigger pressed to `depth` in `[0, 1]`.
pub fn slow_scale(depth: f64, modifier: f64) -> f64 {
    1.0 - depth.clamp(0.0, 1.0) * (1.0 - modifier)
}

fn stick(value: f64, config: &TeleopConfig) -> f64 {
    shape_input(apply_deadband(value, config.stick_deadband), config.input_curve)
}

/// Driver translation request in m/s with deadband, shaping and slow mode applied.
pub(crate) fn driver_translation(ctx: &RobotContext, config: &TeleopConfig) -> (f64, f64) {
    let slow = apply_deadband(ctx.driver.slow, config.stick_deadband);
    let scale = ctx.drivetrain.max_speed() * slow_scale(slow, config.slow_move_modifier);
    (
        stick(ctx.driver.translation, config) * scale,
        stick(ctx.driver.strafe, config) * scale,
    )
}

/// Rotation ceiling for this cycle with fast turn and slow mode applied.
pub(crate) fn driver_rotation_limit(ctx: &RobotContext, config: &TeleopConfig) -> f64 {
    let slow = apply_deadband(ctx.driver.slow, config.stick_deadband);
    ctx.settings.max_angular_velocity(
        ctx.drivetrain.max_angular_velocity(),
        ctx.drivetrain.fast_turn_multiplier(),
    ) * slow_scale(slow, config.slow_turn_modifier)
}

/// Default drivetrain command, sticks straight to chassis speeds.
pub struct TeleopDrive {
    config: TeleopConfig,
}

impl TeleopDrive {
    pub fn new(config: TeleopConfig) -> Self {
        Self { config }
    }
}

impl Command for TeleopDrive {
    fn name(&self) -> &str {
        "teleop drive"
    }

    fn requirements(&self) -> &[Subsystem] {
        &[Subsystem::Drivetrain]
    }

    fn execute(&mut self, ctx: &mut RobotContext) {
        let (translation, strafe) = driver_translation(ctx, &self.config);
        let rotation =
            stick(ctx.driver.rotation, &self.config) * driver_rotation_limit(ctx, &self.config);
        let field_relative = !ctx.settings.robot_centric;
        ctx.drivetrain
            .drive(translation, strafe, rotation, field_relative, true);
    }

    fn end(&mut self, ctx: &mut RobotContext, _interrupted: bool) {
        ctx.drivetrain.drive(0.0, 0.0, 0.0, true, true);
    }
}
