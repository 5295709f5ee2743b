use crate::{
    commands::{
        BindingKind, CommandScheduler, InstantCommand, Subsystem, TeleopDrive, TurnInPlace,
    },
    configuration::AppConfig,
    context::RobotContext,
    dashboard::DriveTelemetry,
    drivetrain::Drivetrain,
    error::RobotError,
    geometry::{wrap_angle, Pose2d},
    input::{messages::Button, DriverInputSource},
    pose_estimator::VisionMeasurement,
    util::LatestReceiver,
};
use std::time::Duration;
use tokio::{
    sync::watch,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Values arriving from outside the control loop, each through its own
/// latest value slot.
pub struct RobotInputs {
    pub driver: DriverInputSource,
    pub vision: LatestReceiver<VisionMeasurement>,
    pub reset_pose: LatestReceiver<Pose2d>,
    /// Degrees.
    pub aim_heading: LatestReceiver<f64>,
}

pub struct Robot {
    ctx: RobotContext,
    scheduler: CommandScheduler,
    inputs: RobotInputs,
    telemetry: watch::Sender<Option<DriveTelemetry>>,
    period: Duration,
    started: Instant,
    last_cycle: Option<Instant>,
}

impl Robot {
    pub fn new(
        config: &AppConfig,
        drivetrain: Drivetrain,
        inputs: RobotInputs,
        telemetry: watch::Sender<Option<DriveTelemetry>>,
    ) -> Result<Self, RobotError> {
        let mut ctx = RobotContext::new(drivetrain, config.runtime.alliance);
        ctx.initialize()?;
        let mut scheduler = CommandScheduler::new();
        configure_bindings(&mut scheduler, config)?;
        Ok(Self {
            ctx,
            scheduler,
            inputs,
            telemetry,
            period: config.runtime.control_period(),
            started: Instant::now(),
            last_cycle: None,
        })
    }

    pub fn context(&self) -> &RobotContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> &CommandScheduler {
        &self.scheduler
    }

    /// Seconds on the robot clock. Vision timestamps use the same clock.
    pub fn clock(&self, now: Instant) -> f64 {
        now.duration_since(self.started).as_secs_f64()
    }

    /// Pulls whatever arrived since the last cycle. Never waits.
    fn apply_inputs(&mut self, now: Instant) {
        if let Ok(Some(pose)) = self.inputs.reset_pose.try_recv() {
            info!(%pose, "Resetting pose");
            self.ctx.drivetrain.reset_pose(pose);
        }
        if let Ok(Some(degrees)) = self.inputs.aim_heading.try_recv() {
            if degrees.is_finite() {
                self.ctx.game_state.aim_heading = Some(wrap_angle(degrees.to_radians()));
            } else {
                warn!(degrees, "Ignoring non finite aim heading");
            }
        }
        self.ctx.driver = self.inputs.driver.poll(now);
        if let Ok(Some(measurement)) = self.inputs.vision.try_recv() {
            if !self.ctx.drivetrain.add_vision_measurement(&measurement) {
                debug!(timestamp = measurement.timestamp, "Stale vision measurement");
            }
        }
    }

    /// One control cycle.
    pub fn periodic(&mut self, now: Instant) -> Result<(), RobotError> {
        let dt = self
            .last_cycle
            .map(|last| now.duration_since(last).as_secs_f64())
            .filter(|dt| *dt > 0.0)
            .unwrap_or(self.period.as_secs_f64());
        self.last_cycle = Some(now);

        self.apply_inputs(now);
        self.ctx.drivetrain.update_inputs(self.clock(now));
        self.scheduler.run(&mut self.ctx)?;
        self.ctx.drivetrain.write_outputs(dt);

        let snapshot =
            DriveTelemetry::capture(&self.ctx, &self.scheduler, self.inputs.driver.is_timed_out());
        self.telemetry.send_replace(Some(snapshot));
        Ok(())
    }

    /// Runs `periodic` at the configured period until an error. Late ticks are
    /// skipped rather than bunched up.
    pub async fn run(mut self) -> Result<(), RobotError> {
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = self.period.as_millis() as u64, "Control loop started");
        loop {
            interval.tick().await;
            self.periodic(Instant::now())?;
        }
    }
}

fn configure_bindings(scheduler: &mut CommandScheduler, config: &AppConfig) -> Result<(), RobotError> {
    let period = config.runtime.control_period().as_secs_f64();

    let teleop = scheduler.register(Box::new(TeleopDrive::new(config.teleop.clone())));
    scheduler.set_default(Subsystem::Drivetrain, teleop)?;

    let zero_heading = scheduler.register(Box::new(InstantCommand::new("zero heading", |ctx| {
        ctx.zero_heading()
    })));
    scheduler.bind(Button::Select, BindingKind::OnTrue, zero_heading)?;

    let toggle_robot_centric = scheduler.register(Box::new(InstantCommand::new(
        "toggle robot centric",
        |ctx| {
            ctx.settings.robot_centric = !ctx.settings.robot_centric;
            info!(robot_centric = ctx.settings.robot_centric, "Drive frame toggled");
        },
    )));
    scheduler.bind(Button::Start, BindingKind::OnTrue, toggle_robot_centric)?;

    let fast_turn_on = scheduler.register(Box::new(InstantCommand::new("fast turn on", |ctx| {
        ctx.settings.fast_turn = true
    })));
    let fast_turn_off = scheduler.register(Box::new(InstantCommand::new("fast turn off", |ctx| {
        ctx.settings.fast_turn = false
    })));
    scheduler.bind(Button::DPadUp, BindingKind::WhileTrue, fast_turn_on)?;
    scheduler.bind(Button::DPadUp, BindingKind::WhileFalse, fast_turn_off)?;

    let turn_in_place = scheduler.register(Box::new(TurnInPlace::toward_aim_heading(
        &config.turn_in_place,
        config.teleop.clone(),
        period,
    )));
    scheduler.bind(Button::LeftTrigger, BindingKind::WhileTrue, turn_in_place)?;
    Ok(())
}
