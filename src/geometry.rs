use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use std::fmt;

/// Wraps an angle in radians into `[-π, π)`.
pub fn wrap_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(TAU) - PI
}

pub fn inches_to_meters(inches: f64) -> f64 {
    inches * 0.0254
}

pub fn rotations_to_radians(rotations: f64) -> f64 {
    rotations * TAU
}

pub fn radians_to_rotations(radians: f64) -> f64 {
    radians / TAU
}

/// Change in pose expressed in the robot frame at the start of the motion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Twist2d {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "PoseRecord", into = "PoseRecord")]
pub struct Pose2d {
    position: na::Point2<f64>,
    rotation: na::Rotation2<f64>,
}

impl Default for Pose2d {
    fn default() -> Self {
        Self::new((0.0, 0.0), 0.0)
    }
}

impl Pose2d {
    pub fn from_na(position: na::Point2<f64>, rotation: na::Rotation2<f64>) -> Self {
        Self { position, rotation }
    }

    pub fn new((x, y): (f64, f64), rotation: f64) -> Self {
        Self {
            position: na::Point2::new(x, y),
            rotation: na::Rotation2::new(rotation),
        }
    }

    pub fn position(&self) -> &na::Point2<f64> {
        &self.position
    }

    pub fn rotation(&self) -> &na::Rotation2<f64> {
        &self.rotation
    }

    pub fn x(&self) -> f64 {
        self.position.x
    }

    pub fn y(&self) -> f64 {
        self.position.y
    }

    /// Heading in radians, wrapped into `[-π, π)`.
    pub fn heading(&self) -> f64 {
        wrap_angle(self.rotation.angle())
    }

    pub fn with_rotation(&self, rotation: na::Rotation2<f64>) -> Self {
        Self::from_na(self.position, rotation)
    }

    /// Applies a robot-relative twist along a constant-curvature arc.
    pub fn exp(&self, twist: &Twist2d) -> Self {
        let (sin_theta, cos_theta) = twist.dtheta.sin_cos();
        let (s, c) = if twist.dtheta.abs() < 1e-9 {
            (
                1.0 - twist.dtheta.powi(2) / 6.0,
                0.5 * twist.dtheta,
            )
        } else {
            (sin_theta / twist.dtheta, (1.0 - cos_theta) / twist.dtheta)
        };
        let local = na::Vector2::new(
            twist.dx * s - twist.dy * c,
            twist.dx * c + twist.dy * s,
        );
        Self {
            position: self.position + self.rotation * local,
            rotation: self.rotation * na::Rotation2::new(twist.dtheta),
        }
    }

    /// Linear interpolation of position, shortest-arc interpolation of heading.
    pub fn interpolate(&self, other: &Pose2d, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        let position = self.position + (other.position - self.position) * t;
        let rotation = self.rotation * na::Rotation2::new(self.rotation.angle_to(&other.rotation) * t);
        Self { position, rotation }
    }
}

impl fmt::Display for Pose2d {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{:.3}, {:.3}] -> {:.1}",
            self.position.x,
            self.position.y,
            self.rotation.angle().to_degrees()
        )
    }
}

/// Flat representation used on the message bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PoseRecord {
    x: f64,
    y: f64,
    heading_degrees: f64,
}

impl From<PoseRecord> for Pose2d {
    fn from(record: PoseRecord) -> Self {
        Pose2d::new((record.x, record.y), record.heading_degrees.to_radians())
    }
}

impl From<Pose2d> for PoseRecord {
    fn from(pose: Pose2d) -> Self {
        PoseRecord {
            x: pose.x(),
            y: pose.y(),
            heading_degrees: pose.heading().to_degrees(),
        }
    }
}
