//! Wheel odometry fused with delayed vision fixes.
//!
//! Odometry integrates the module position deltas along an arc every cycle
//! and takes its heading from the gyro. Vision fixes are compared against the
//! pose the robot believed it had when the image was captured and a fraction
//! of the difference is applied to the current estimate.

use crate::{
    geometry::{wrap_angle, Pose2d},
    kinematics::{ModulePosition, SwerveKinematics, MODULE_COUNT},
};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StdDevs {
    /// metres
    pub x: f64,
    /// metres
    pub y: f64,
    /// radians
    pub theta: f64,
}

impl StdDevs {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }
}

/// How far a vision fix can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionTrust {
    SingleTag,
    MultiTag,
    Custom(StdDevs),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisionMeasurement {
    pub pose: Pose2d,
    /// Capture time on the robot clock, seconds.
    pub timestamp: f64,
    pub trust: VisionTrust,
}

#[derive(Debug, Clone, Copy)]
pub struct VisionTrustLevels {
    pub single_tag: StdDevs,
    pub multi_tag: StdDevs,
}

impl VisionTrustLevels {
    pub fn std_devs(&self, trust: &VisionTrust) -> StdDevs {
        match trust {
            VisionTrust::SingleTag => self.single_tag,
            VisionTrust::MultiTag => self.multi_tag,
            VisionTrust::Custom(std_devs) => *std_devs,
        }
    }
}

/// Steady state Kalman gain for one axis with process variance `q` and
/// measurement variance `r`.
pub fn vision_gain(state_std_dev: f64, measurement_std_dev: f64) -> f64 {
    let q = state_std_dev.powi(2);
    let r = measurement_std_dev.powi(2);
    if q == 0.0 {
        0.0
    } else {
        q / (q + (q * r).sqrt())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PoseSample {
    timestamp: f64,
    pose: Pose2d,
}

pub struct SwervePoseEstimator {
    kinematics: SwerveKinematics,
    state_std_devs: StdDevs,
    trust_levels: VisionTrustLevels,
    history_seconds: f64,
    pose: Pose2d,
    /// Field heading is `gyro_offset * gyro`.
    gyro_offset: na::Rotation2<f64>,
    previous_gyro: na::Rotation2<f64>,
    previous_positions: [ModulePosition; MODULE_COUNT],
    history: VecDeque<PoseSample>,
}

impl SwervePoseEstimator {
    pub fn new(
        kinematics: SwerveKinematics,
        gyro_yaw: f64,
        positions: [ModulePosition; MODULE_COUNT],
        initial_pose: Pose2d,
        state_std_devs: StdDevs,
        trust_levels: VisionTrustLevels,
        history_seconds: f64,
    ) -> Self {
        let gyro = na::Rotation2::new(gyro_yaw);
        Self {
            kinematics,
            state_std_devs,
            trust_levels,
            history_seconds,
            pose: initial_pose,
            gyro_offset: initial_pose.rotation() * gyro.inverse(),
            previous_gyro: gyro,
            previous_positions: positions,
            history: VecDeque::new(),
        }
    }

    pub fn pose(&self) -> Pose2d {
        self.pose
    }

    /// Moves the estimate to `pose`. History is dropped because it no longer
    /// describes the same frame.
    pub fn reset_pose(&mut self, gyro_yaw: f64, positions: [ModulePosition; MODULE_COUNT], pose: Pose2d) {
        let gyro = na::Rotation2::new(gyro_yaw);
        self.pose = pose;
        self.gyro_offset = pose.rotation() * gyro.inverse();
        self.previous_gyro = gyro;
        self.previous_positions = positions;
        self.history.clear();
        debug!(%pose, "Pose reset");
    }

    /// Integrates one odometry step and records it in the history buffer.
    pub fn update(
        &mut self,
        timestamp: f64,
        gyro_yaw: f64,
        positions: [ModulePosition; MODULE_COUNT],
    ) -> Pose2d {
        let gyro = na::Rotation2::new(gyro_yaw);
        let mut twist = self.kinematics.to_twist(&self.previous_positions, &positions);
        twist.dtheta = self.previous_gyro.angle_to(&gyro);

        let moved = self.pose.exp(&twist);
        self.pose = moved.with_rotation(self.gyro_offset * gyro);
        self.previous_gyro = gyro;
        self.previous_positions = positions;

        self.history.push_back(PoseSample {
            timestamp,
            pose: self.pose,
        });
        while let Some(oldest) = self.history.front() {
            if timestamp - oldest.timestamp > self.history_seconds {
                self.history.pop_front();
            } else {
                break;
            }
        }
        self.pose
    }

    /// Fuses a vision fix. Returns false when the fix is older than the
    /// history buffer and was ignored.
    pub fn add_vision_measurement(&mut self, measurement: &VisionMeasurement) -> bool {
        let sample = match self.sample_at(measurement.timestamp) {
            Some(sample) => sample,
            None => {
                trace!(
                    timestamp = measurement.timestamp,
                    "Vision measurement outside pose history, ignored"
                );
                return false;
            }
        };

        let std_devs = self.trust_levels.std_devs(&measurement.trust);
        let gain_x = vision_gain(self.state_std_devs.x, std_devs.x);
        let gain_y = vision_gain(self.state_std_devs.y, std_devs.y);
        let gain_theta = vision_gain(self.state_std_devs.theta, std_devs.theta);

        let correction = na::Vector2::new(
            (measurement.pose.x() - sample.x()) * gain_x,
            (measurement.pose.y() - sample.y()) * gain_y,
        );
        let rotation_correction = na::Rotation2::new(
            wrap_angle(measurement.pose.heading() - sample.heading()) * gain_theta,
        );

        let apply = |pose: &Pose2d| {
            Pose2d::from_na(
                pose.position() + correction,
                rotation_correction * pose.rotation(),
            )
        };
        self.pose = apply(&self.pose);
        self.gyro_offset = rotation_correction * self.gyro_offset;
        for entry in self
            .history
            .iter_mut()
            .filter(|entry| entry.timestamp >= measurement.timestamp)
        {
            entry.pose = apply(&entry.pose);
        }
        debug!(
            dx = correction.x,
            dy = correction.y,
            dtheta_degrees = rotation_correction.angle().to_degrees(),
            "Vision correction applied"
        );
        true
    }

    fn sample_at(&self, timestamp: f64) -> Option<Pose2d> {
        let oldest = self.history.front()?;
        let newest = self.history.back()?;
        if timestamp < oldest.timestamp {
            return None;
        }
        if timestamp >= newest.timestamp {
            return Some(newest.pose);
        }
        let after = self
            .history
            .iter()
            .position(|entry| entry.timestamp >= timestamp)?;
        let upper = self.history[after];
        if after == 0 || upper.timestamp == timestamp {
            return Some(upper.pose);
        }
        let lower = self.history[after - 1];
        let t = (timestamp - lower.timestamp) / (upper.timestamp - lower.timestamp);
        Some(lower.pose.interpolate(&upper.pose, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    const HALF: f64 = 0.263525;

    fn kinematics() -> SwerveKinematics {
        SwerveKinematics::new([
            na::Vector2::new(HALF, HALF),
            na::Vector2::new(HALF, -HALF),
            na::Vector2::new(-HALF, HALF),
            na::Vector2::new(-HALF, -HALF),
        ])
        .unwrap()
    }

    fn trust() -> VisionTrustLevels {
        VisionTrustLevels {
            single_tag: StdDevs::new(0.03, 0.03, 40_f64.to_radians()),
            multi_tag: StdDevs::new(0.05, 0.05, 40_f64.to_radians()),
        }
    }

    fn estimator() -> SwervePoseEstimator {
        SwervePoseEstimator::new(
            kinematics(),
            0.0,
            [ModulePosition::default(); MODULE_COUNT],
            Pose2d::default(),
            StdDevs::new(0.1, 0.1, 0.1),
            trust(),
            1.5,
        )
    }

    fn positions(distance: f64, angle: f64) -> [ModulePosition; MODULE_COUNT] {
        [ModulePosition::new(distance, angle); MODULE_COUNT]
    }

    #[test]
    fn straight_line_odometry() {
        let mut estimator = estimator();
        for step in 1..=50 {
            estimator.update(step as f64 * 0.02, 0.0, positions(step as f64 * 0.02, 0.0));
        }
        let pose = estimator.pose();
        assert_relative_eq!(pose.x(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(pose.y(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn heading_follows_gyro_with_offset() {
        let mut estimator = estimator();
        estimator.reset_pose(0.3, positions(0.0, 0.0), Pose2d::new((1.0, 2.0), FRAC_PI_2));
        let pose = estimator.update(0.02, 0.4, positions(0.0, 0.0));
        assert_relative_eq!(pose.heading(), FRAC_PI_2 + 0.1, epsilon = 1e-9);
        assert_relative_eq!(pose.x(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn sideways_motion_after_quarter_turn() {
        let mut estimator = estimator();
        estimator.reset_pose(0.0, positions(0.0, 0.0), Pose2d::new((0.0, 0.0), FRAC_PI_2));
        estimator.update(0.02, 0.0, positions(1.0, 0.0));
        assert_relative_eq!(estimator.pose().x(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(estimator.pose().y(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn gain_matches_kalman_steady_state() {
        // q = 0.01, r = 0.0009
        assert_relative_eq!(vision_gain(0.1, 0.03), 0.01 / 0.013, epsilon = 1e-12);
        assert_relative_eq!(vision_gain(0.1, 0.0), 1.0);
        assert_relative_eq!(vision_gain(0.0, 0.5), 0.0);
    }

    #[test]
    fn vision_pulls_pose_toward_fix() {
        let mut estimator = estimator();
        estimator.update(0.02, 0.0, positions(0.0, 0.0));
        let applied = estimator.add_vision_measurement(&VisionMeasurement {
            pose: Pose2d::new((1.0, 0.0), 0.0),
            timestamp: 0.02,
            trust: VisionTrust::SingleTag,
        });
        assert!(applied);
        assert_relative_eq!(estimator.pose().x(), vision_gain(0.1, 0.03), epsilon = 1e-9);
        assert_relative_eq!(estimator.pose().y(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn vision_heading_correction_survives_next_update() {
        let mut estimator = estimator();
        estimator.update(0.02, 0.0, positions(0.0, 0.0));
        estimator.add_vision_measurement(&VisionMeasurement {
            pose: Pose2d::new((0.0, 0.0), 0.2),
            timestamp: 0.02,
            trust: VisionTrust::Custom(StdDevs::new(0.1, 0.1, 0.1)),
        });
        let corrected = estimator.pose().heading();
        assert_relative_eq!(corrected, 0.1, epsilon = 1e-9);
        estimator.update(0.04, 0.0, positions(0.0, 0.0));
        assert_relative_eq!(estimator.pose().heading(), corrected, epsilon = 1e-9);
    }

    #[test]
    fn stale_vision_is_ignored() {
        let mut estimator = estimator();
        for step in 1..=100 {
            estimator.update(step as f64 * 0.02, 0.0, positions(0.0, 0.0));
        }
        let applied = estimator.add_vision_measurement(&VisionMeasurement {
            pose: Pose2d::new((3.0, 3.0), 0.0),
            timestamp: 0.1,
            trust: VisionTrust::MultiTag,
        });
        assert!(!applied);
        assert_relative_eq!(estimator.pose().x(), 0.0);
    }

    #[test]
    fn delayed_fix_is_compared_against_past_pose() {
        let mut estimator = estimator();
        for step in 1..=10 {
            estimator.update(step as f64 * 0.1, 0.0, positions(step as f64 * 0.1, 0.0));
        }
        // robot thought it was at x = 0.5 at t = 0.5, camera agrees
        estimator.add_vision_measurement(&VisionMeasurement {
            pose: Pose2d::new((0.5, 0.0), 0.0),
            timestamp: 0.5,
            trust: VisionTrust::SingleTag,
        });
        assert_relative_eq!(estimator.pose().x(), 1.0, epsilon = 1e-9);
    }
}
