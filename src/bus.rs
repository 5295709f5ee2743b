//! Message bus glue: JSON topics in, telemetry out.

use crate::{
    dashboard::{DriveTelemetry, TelemetryPublisher},
    error::ErrorWrapper,
    util::LatestSender,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{error, warn};
use zenoh::{prelude::r#async::*, subscriber::FlumeSubscriber, Session, SessionDeclarations};

pub const GAMEPAD_TOPIC: &str = "remote-control/gamepad";
pub const VISION_TOPIC: &str = "swerve/vision";
pub const AIM_HEADING_TOPIC: &str = "swerve/aim-heading";
pub const RESET_POSE_TOPIC: &str = "swerve/reset-pose";
pub const TELEMETRY_TOPIC: &str = "swerve/telemetry";

/// Subscribes to `topic` and forwards every well formed JSON message to
/// `sender`. The control loop only ever sees the most recent one.
pub async fn start_json_listener<T>(
    zenoh_session: Arc<Session>,
    topic: &'static str,
    sender: LatestSender<T>,
) -> Result<()>
where
    T: DeserializeOwned + Send + 'static,
{
    let mut subscriber = zenoh_session
        .declare_subscriber(topic)
        .res()
        .await
        .map_err(ErrorWrapper::ZenohError)?;

    tokio::spawn(async move {
        while let Err(err) = run_json_listener(&mut subscriber, topic, &sender).await {
            error!(topic, "Listener failed with {:?}", err);
            if sender.is_closed() {
                break;
            }
        }
    });
    Ok(())
}

async fn run_json_listener<T: DeserializeOwned>(
    subscriber: &mut FlumeSubscriber<'_>,
    topic: &str,
    sender: &LatestSender<T>,
) -> Result<()> {
    loop {
        let sample = subscriber.recv_async().await?;
        let message: String = sample.value.try_into()?;
        match parse_message::<T>(&message) {
            Ok(value) => sender.send(value)?,
            Err(err) => warn!(topic, "Dropping malformed message {:?}", err),
        }
    }
}

pub fn parse_message<T: DeserializeOwned>(message: &str) -> Result<T> {
    Ok(serde_json::from_str(message)?)
}

pub struct ZenohTelemetryPublisher {
    zenoh_session: Arc<Session>,
    topic: String,
}

impl ZenohTelemetryPublisher {
    pub fn new(zenoh_session: Arc<Session>) -> Self {
        Self {
            zenoh_session,
            topic: TELEMETRY_TOPIC.to_owned(),
        }
    }
}

#[async_trait]
impl TelemetryPublisher for ZenohTelemetryPublisher {
    async fn publish(&self, telemetry: &DriveTelemetry) -> Result<()> {
        let json = serde_json::to_string(telemetry)?;
        self.zenoh_session
            .put(self.topic.as_str(), json)
            .res_async()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        Ok(())
    }
}
