use crate::{
    commands::CommandScheduler,
    context::{Alliance, RobotContext},
    geometry::Pose2d,
    kinematics::ChassisSpeeds,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleTelemetry {
    pub name: String,
    pub angle_degrees: f64,
    pub speed: f64,
    pub desired_angle_degrees: Option<f64>,
    pub desired_speed: Option<f64>,
    pub calibration_fault: bool,
    pub current_limited: bool,
    pub drive_limit_trips: u32,
    pub angle_limit_trips: u32,
}

/// Everything the driver station shows, captured once per control cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriveTelemetry {
    pub time: DateTime<Utc>,
    pub pose: Pose2d,
    pub heading_degrees: f64,
    pub heading_stale: bool,
    /// Measured, robot frame.
    pub chassis_speeds: ChassisSpeeds,
    pub field_oriented: bool,
    pub fast_turn: bool,
    pub turn_on_target: bool,
    pub alliance: Option<Alliance>,
    pub input_timed_out: bool,
    pub running_commands: Vec<String>,
    pub modules: Vec<ModuleTelemetry>,
}

impl DriveTelemetry {
    pub fn capture(ctx: &RobotContext, scheduler: &CommandScheduler, input_timed_out: bool) -> Self {
        let drivetrain = &ctx.drivetrain;
        let modules = drivetrain
            .modules()
            .iter()
            .map(|module| {
                let state = module.state();
                let desired = module.desired_state();
                ModuleTelemetry {
                    name: module.name().to_owned(),
                    angle_degrees: state.angle.to_degrees(),
                    speed: state.speed,
                    desired_angle_degrees: desired.map(|state| state.angle.to_degrees()),
                    desired_speed: desired.map(|state| state.speed),
                    calibration_fault: module.calibration_fault(),
                    current_limited: module.is_current_limited(),
                    drive_limit_trips: module.drive_limit_trips(),
                    angle_limit_trips: module.angle_limit_trips(),
                }
            })
            .collect();
        Self {
            time: Utc::now(),
            pose: drivetrain.pose(),
            heading_degrees: drivetrain.heading().to_degrees(),
            heading_stale: drivetrain.heading_stale(),
            chassis_speeds: drivetrain.chassis_speeds(),
            field_oriented: !ctx.settings.robot_centric,
            fast_turn: ctx.settings.fast_turn,
            turn_on_target: ctx.robot_state.turn_on_target,
            alliance: ctx.game_state.alliance,
            input_timed_out,
            running_commands: scheduler.running_names(),
            modules,
        }
    }
}

#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    async fn publish(&self, telemetry: &DriveTelemetry) -> Result<()>;
}

/// Forwards snapshots from the control loop to `publisher`, at most once per
/// `min_interval`. Intermediate snapshots are skipped.
pub async fn run_dashboard(
    mut receiver: watch::Receiver<Option<DriveTelemetry>>,
    publisher: Box<dyn TelemetryPublisher>,
    min_interval: Duration,
) {
    info!("Dashboard started");
    while receiver.changed().await.is_ok() {
        let snapshot = receiver.borrow_and_update().clone();
        if let Some(snapshot) = snapshot {
            if let Err(err) = publisher.publish(&snapshot).await {
                error!("Failed to publish telemetry {:?}", err);
            }
        }
        tokio::time::sleep(min_interval).await;
    }
    info!("Dashboard stopped, control loop gone");
}
