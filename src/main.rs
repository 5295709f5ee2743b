use anyhow::Result;
use clap::Parser;
use std::{path::PathBuf, time::Duration};
use swerve_drive::{
    bus::{
        start_json_listener, ZenohTelemetryPublisher, AIM_HEADING_TOPIC, GAMEPAD_TOPIC,
        RESET_POSE_TOPIC, VISION_TOPIC,
    },
    configuration,
    dashboard::run_dashboard,
    driver::{BenchGyro, BenchModuleIo, SwerveModuleIo},
    drivetrain::Drivetrain,
    error::ErrorWrapper,
    input::DriverInputSource,
    kinematics::MODULE_COUNT,
    logging,
    robot::{Robot, RobotInputs},
    util::latest_value_channel,
};
use tokio::sync::watch;
use tracing::*;
use zenoh::prelude::r#async::*;

const DASHBOARD_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(
    version,
    author = "David M. Weis <dweis7@gmail.com>",
    about = "Swerve drivetrain control loop"
)]
struct Args {
    /// path to config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbosity);

    let app_config = configuration::AppConfig::load_config(&args.config)?;

    // zenoh
    let zenoh_config = app_config.zenoh.get_zenoh_config()?;
    let zenoh_session = zenoh::open(zenoh_config)
        .res()
        .await
        .map_err(ErrorWrapper::ZenohError)?
        .into_arc();

    let (gamepad_tx, gamepad_rx) = latest_value_channel();
    let (vision_tx, vision_rx) = latest_value_channel();
    let (reset_pose_tx, reset_pose_rx) = latest_value_channel();
    let (aim_heading_tx, aim_heading_rx) = latest_value_channel();
    start_json_listener(zenoh_session.clone(), GAMEPAD_TOPIC, gamepad_tx).await?;
    start_json_listener(zenoh_session.clone(), VISION_TOPIC, vision_tx).await?;
    start_json_listener(zenoh_session.clone(), RESET_POSE_TOPIC, reset_pose_tx).await?;
    start_json_listener(zenoh_session.clone(), AIM_HEADING_TOPIC, aim_heading_tx).await?;

    let period = app_config.runtime.control_period();
    let ios: [Box<dyn SwerveModuleIo>; MODULE_COUNT] = std::array::from_fn(|_| {
        Box::new(BenchModuleIo::new(period.as_secs_f64())) as Box<dyn SwerveModuleIo>
    });
    warn!(
        gyro_id = app_config.drivetrain.gyro_id,
        "No motor controllers or gyro attached, running on bench hardware"
    );
    let drivetrain = Drivetrain::new(
        &app_config.drivetrain,
        &app_config.vision,
        ios,
        Box::new(BenchGyro::default()),
    )?;

    let (telemetry_tx, telemetry_rx) = watch::channel(None);
    tokio::spawn(run_dashboard(
        telemetry_rx,
        Box::new(ZenohTelemetryPublisher::new(zenoh_session.clone())),
        DASHBOARD_INTERVAL,
    ));

    let inputs = RobotInputs {
        driver: DriverInputSource::new(gamepad_rx, app_config.teleop.input_timeout()),
        vision: vision_rx,
        reset_pose: reset_pose_rx,
        aim_heading: aim_heading_rx,
    };
    let robot = Robot::new(&app_config, drivetrain, inputs, telemetry_tx)?;

    tokio::select! {
        result = robot.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
