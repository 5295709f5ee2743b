use super::{
    teleop_drive::{driver_rotation_limit, driver_translation},
    Command, Subsystem,
};
use crate::{
    configuration::{TeleopConfig, TurnInPlaceConfig},
    context::RobotContext,
    pid::PidController,
};

/// Supplies the field heading to aim at, `None` to hold the current one.
pub type HeadingTarget = Box<dyn Fn(&RobotContext) -> Option<f64> + Send>;

/// Rotates to a target heading while the driver keeps control of translation.
pub struct TurnInPlace {
    teleop: TeleopConfig,
    pid: PidController,
    target: HeadingTarget,
    held_heading: f64,
    period: f64,
}

impl TurnInPlace {
    pub fn new(
        config: &TurnInPlaceConfig,
        teleop: TeleopConfig,
        period: f64,
        target: HeadingTarget,
    ) -> Self {
        Self {
            teleop,
            pid: PidController::new(config.gains)
                .with_continuous_angle()
                .with_tolerance(config.tolerance_degrees.to_radians()),
            target,
            held_heading: 0.0,
            period,
        }
    }

    /// Aims at the heading published in the game state.
    pub fn toward_aim_heading(config: &TurnInPlaceConfig, teleop: TeleopConfig, period: f64) -> Self {
        Self::new(
            config,
            teleop,
            period,
            Box::new(|ctx: &RobotContext| ctx.game_state.aim_heading),
        )
    }

    pub fn at_setpoint(&self) -> bool {
        self.pid.at_setpoint()
    }
}

impl Command for TurnInPlace {
    fn name(&self) -> &str {
        "turn in place"
    }

    fn requirements(&self) -> &[Subsystem] {
        &[Subsystem::Drivetrain]
    }

    fn initialize(&mut self, ctx: &mut RobotContext) {
        self.pid.reset();
        self.held_heading = ctx.drivetrain.heading();
        ctx.robot_state.turn_on_target = false;
    }

    fn execute(&mut self, ctx: &mut RobotContext) {
        let setpoint = (self.target)(ctx).unwrap_or(self.held_heading);
        let limit = driver_rotation_limit(ctx, &self.teleop);
        let rotation = self
            .pid
            .calculate(ctx.drivetrain.heading(), setpoint, self.period)
            .clamp(-limit, limit);
        let (translation, strafe) = driver_translation(ctx, &self.teleop);
        let field_relative = !ctx.settings.robot_centric;
        ctx.drivetrain
            .drive(translation, strafe, rotation, field_relative, true);
        ctx.robot_state.turn_on_target = self.pid.at_setpoint();
    }

    fn end(&mut self, ctx: &mut RobotContext, _interrupted: bool) {
        ctx.drivetrain.drive(0.0, 0.0, 0.0, true, true);
        ctx.robot_state.turn_on_target = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configuration::tests::default_config,
        driver::BenchGyro,
        drivetrain::tests::{bench_drivetrain, PERIOD},
        kinematics::{ChassisSpeeds, MODULE_COUNT},
    };
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn setup(gyro: &BenchGyro) -> (RobotContext, TurnInPlace) {
        let config = default_config();
        let mut ctx = RobotContext::new(bench_drivetrain(gyro), None);
        ctx.initialize().unwrap();
        ctx.drivetrain.update_inputs(PERIOD);
        let command =
            TurnInPlace::toward_aim_heading(&config.turn_in_place, config.teleop, PERIOD);
        (ctx, command)
    }

    fn commanded(ctx: &RobotContext) -> ChassisSpeeds {
        let states: [_; MODULE_COUNT] = ctx
            .drivetrain
            .desired_states()
            .map(|state| state.unwrap_or_default());
        ctx.drivetrain.kinematics().to_chassis_speeds(&states)
    }

    fn commanded_omega(ctx: &RobotContext) -> f64 {
        commanded(ctx).omega
    }

    #[test]
    fn turns_toward_aim_heading() {
        let gyro = BenchGyro::default();
        let (mut ctx, mut command) = setup(&gyro);
        ctx.game_state.aim_heading = Some(0.5);
        command.initialize(&mut ctx);
        command.execute(&mut ctx);
        // kp 4.0 on a 0.5 rad error
        assert_relative_eq!(commanded_omega(&ctx), 2.0, epsilon = 1e-6);
        assert!(!ctx.robot_state.turn_on_target);
    }

    #[test]
    fn driver_keeps_translation_while_aiming() {
        let gyro = BenchGyro::default();
        let (mut ctx, mut command) = setup(&gyro);
        // half stick, full stick plus any turn would be desaturated
        ctx.driver.translation = 0.5;
        ctx.driver.strafe = -0.3;
        ctx.game_state.aim_heading = Some(0.5);
        command.initialize(&mut ctx);
        command.execute(&mut ctx);

        let (translation, strafe) = driver_translation(&ctx, &default_config().teleop);
        assert!(translation > 0.0);
        assert!(strafe < 0.0);
        let speeds = commanded(&ctx);
        // heading is zero, so field and robot frames agree
        assert_relative_eq!(speeds.vx, translation, epsilon = 1e-6);
        assert_relative_eq!(speeds.vy, strafe, epsilon = 1e-6);
        assert_relative_eq!(speeds.omega, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn full_stick_while_aiming_keeps_direction_within_max_speed() {
        let gyro = BenchGyro::default();
        let (mut ctx, mut command) = setup(&gyro);
        ctx.driver.translation = 1.0;
        ctx.game_state.aim_heading = Some(0.5);
        command.initialize(&mut ctx);
        command.execute(&mut ctx);

        let max_speed = ctx.drivetrain.max_speed();
        let fastest = ctx
            .drivetrain
            .desired_states()
            .iter()
            .map(|state| state.unwrap().speed.abs())
            .fold(0.0, f64::max);
        assert_relative_eq!(fastest, max_speed, epsilon = 1e-9);
        let speeds = commanded(&ctx);
        assert!(speeds.vx > 0.8 * max_speed);
        assert_relative_eq!(speeds.vy, 0.0, epsilon = 1e-6);
        assert!(speeds.omega > 0.0);
        // desaturation scales every module alike, so the ratio survives
        assert_relative_eq!(speeds.omega / speeds.vx, 2.0 / max_speed, epsilon = 1e-6);
    }

    #[test]
    fn rotation_is_clamped_to_angular_limit() {
        let gyro = BenchGyro::default();
        let (mut ctx, mut command) = setup(&gyro);
        ctx.game_state.aim_heading = Some(PI - 0.01);
        command.initialize(&mut ctx);
        command.execute(&mut ctx);
        assert_relative_eq!(commanded_omega(&ctx), 2.5 * PI, epsilon = 1e-6);

        ctx.driver.slow = 1.0;
        command.execute(&mut ctx);
        assert_relative_eq!(commanded_omega(&ctx), 2.5 * PI * 0.8, epsilon = 1e-6);
    }

    #[test]
    fn holds_heading_without_target_and_reports_on_target() {
        let gyro = BenchGyro::default();
        let (mut ctx, mut command) = setup(&gyro);
        command.initialize(&mut ctx);
        command.execute(&mut ctx);
        assert_relative_eq!(commanded_omega(&ctx), 0.0, epsilon = 1e-9);
        assert!(ctx.robot_state.turn_on_target);

        command.end(&mut ctx, true);
        assert!(!ctx.robot_state.turn_on_target);
    }

    #[test]
    fn takes_the_short_way_across_the_seam() {
        let gyro = BenchGyro::default();
        let (mut ctx, mut command) = setup(&gyro);
        ctx.drivetrain
            .reset_pose(crate::geometry::Pose2d::new((0.0, 0.0), 170_f64.to_radians()));
        ctx.game_state.aim_heading = Some(-170_f64.to_radians());
        command.initialize(&mut ctx);
        command.execute(&mut ctx);
        assert!(commanded_omega(&ctx) > 0.0);
    }
}
