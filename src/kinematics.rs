use crate::geometry::{wrap_angle, Twist2d};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use thiserror::Error;

pub const MODULE_COUNT: usize = 4;

type InverseMatrix = na::SMatrix<f64, 8, 3>;
type ForwardMatrix = na::SMatrix<f64, 3, 8>;

#[derive(Error, Debug, PartialEq)]
pub enum KinematicsError {
    #[error("module locations do not span a usable geometry")]
    DegenerateGeometry,
}

/// Chassis velocity. `vx` is forward, `vy` is left, `omega` is counter-clockwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisSpeeds {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}

impl ChassisSpeeds {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    pub fn stopped() -> Self {
        Self::default()
    }

    /// Converts a field frame request into the robot frame given the robot heading.
    pub fn from_field_relative(vx: f64, vy: f64, omega: f64, heading: &na::Rotation2<f64>) -> Self {
        let robot_relative = heading.inverse() * na::Vector2::new(vx, vy);
        Self::new(robot_relative.x, robot_relative.y, omega)
    }

    pub fn is_stopped(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0 && self.omega == 0.0
    }
}

/// Wheel speed in m/s and wheel angle in radians, wrapped into `[-π, π)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SwerveModuleState {
    pub speed: f64,
    pub angle: f64,
}

/// Target for the steering loop in continuous angle space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuousTarget {
    pub angle: f64,
    pub speed: f64,
    pub flipped: bool,
}

impl SwerveModuleState {
    pub fn new(speed: f64, angle: f64) -> Self {
        Self {
            speed,
            angle: wrap_angle(angle),
        }
    }

    /// Picks the equivalent target closest to `current_angle`, an unwrapped
    /// steering angle. The result never lies more than 90° away; reaching it
    /// may require reversing the wheel.
    pub fn optimize(&self, current_angle: f64) -> ContinuousTarget {
        let mut delta = wrap_angle(self.angle - current_angle);
        let flipped = delta.abs() > FRAC_PI_2;
        let mut speed = self.speed;
        if flipped {
            delta = wrap_angle(delta + PI);
            speed = -speed;
        }
        ContinuousTarget {
            angle: current_angle + delta,
            speed,
            flipped,
        }
    }
}

/// Cumulative wheel travel in metres and wheel angle in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModulePosition {
    pub distance: f64,
    pub angle: f64,
}

impl ModulePosition {
    pub fn new(distance: f64, angle: f64) -> Self {
        Self {
            distance,
            angle: wrap_angle(angle),
        }
    }
}

/// Scales every module speed by the same factor so none exceeds `max_speed`.
pub fn desaturate_wheel_speeds(states: &mut [SwerveModuleState; MODULE_COUNT], max_speed: f64) {
    let fastest = states
        .iter()
        .map(|state| state.speed.abs())
        .fold(0.0, f64::max);
    if fastest > max_speed {
        let scale = max_speed / fastest;
        for state in states.iter_mut() {
            state.speed *= scale;
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    locations: [na::Vector2<f64>; MODULE_COUNT],
    inverse: InverseMatrix,
    forward: ForwardMatrix,
    center_of_rotation: na::Vector2<f64>,
    last_angles: [f64; MODULE_COUNT],
}

impl SwerveKinematics {
    /// Module locations are in metres from the robot centre, x forward, y left,
    /// ordered front-left, front-right, back-left, back-right.
    pub fn new(locations: [na::Vector2<f64>; MODULE_COUNT]) -> Result<Self, KinematicsError> {
        let origin = na::Vector2::zeros();
        let inverse = build_inverse_matrix(&locations, &origin);
        let normal = inverse.transpose() * inverse;
        let normal_inverse = normal
            .try_inverse()
            .ok_or(KinematicsError::DegenerateGeometry)?;
        let forward = normal_inverse * inverse.transpose();
        Ok(Self {
            locations,
            inverse,
            forward,
            center_of_rotation: origin,
            last_angles: [0.0; MODULE_COUNT],
        })
    }

    pub fn locations(&self) -> &[na::Vector2<f64>; MODULE_COUNT] {
        &self.locations
    }

    /// Farthest module distance from the robot centre.
    pub fn drive_base_radius(&self) -> f64 {
        self.locations
            .iter()
            .map(|location| location.norm())
            .fold(0.0, f64::max)
    }

    pub fn to_module_states(&mut self, speeds: ChassisSpeeds) -> [SwerveModuleState; MODULE_COUNT] {
        self.to_module_states_about(speeds, na::Vector2::zeros())
    }

    /// Module targets for rotating about an arbitrary point in the robot frame.
    /// A stopped chassis keeps each wheel at its previous angle.
    pub fn to_module_states_about(
        &mut self,
        speeds: ChassisSpeeds,
        center_of_rotation: na::Vector2<f64>,
    ) -> [SwerveModuleState; MODULE_COUNT] {
        if speeds.is_stopped() {
            return self.last_angles.map(|angle| SwerveModuleState::new(0.0, angle));
        }
        if center_of_rotation != self.center_of_rotation {
            self.inverse = build_inverse_matrix(&self.locations, &center_of_rotation);
            self.center_of_rotation = center_of_rotation;
        }

        let module_velocities = self.inverse * na::Vector3::new(speeds.vx, speeds.vy, speeds.omega);
        let states: [SwerveModuleState; MODULE_COUNT] = std::array::from_fn(|index| {
            let x = module_velocities[2 * index];
            let y = module_velocities[2 * index + 1];
            let speed = x.hypot(y);
            if speed > f64::EPSILON {
                SwerveModuleState::new(speed, y.atan2(x))
            } else {
                // module sits on the centre of rotation
                SwerveModuleState::new(0.0, self.last_angles[index])
            }
        });
        self.last_angles = states.map(|state| state.angle);
        states
    }

    /// Least squares chassis velocity for a set of measured module states.
    pub fn to_chassis_speeds(&self, states: &[SwerveModuleState; MODULE_COUNT]) -> ChassisSpeeds {
        let mut module_velocities = na::SVector::<f64, 8>::zeros();
        for (index, state) in states.iter().enumerate() {
            let (sin, cos) = state.angle.sin_cos();
            module_velocities[2 * index] = state.speed * cos;
            module_velocities[2 * index + 1] = state.speed * sin;
        }
        let chassis = self.forward * module_velocities;
        ChassisSpeeds::new(chassis.x, chassis.y, chassis.z)
    }

    /// Robot-frame twist between two sets of module positions.
    pub fn to_twist(
        &self,
        start: &[ModulePosition; MODULE_COUNT],
        end: &[ModulePosition; MODULE_COUNT],
    ) -> Twist2d {
        let deltas: [SwerveModuleState; MODULE_COUNT] = std::array::from_fn(|index| {
            SwerveModuleState::new(end[index].distance - start[index].distance, end[index].angle)
        });
        let chassis = self.to_chassis_speeds(&deltas);
        Twist2d {
            dx: chassis.vx,
            dy: chassis.vy,
            dtheta: chassis.omega,
        }
    }
}

fn build_inverse_matrix(
    locations: &[na::Vector2<f64>; MODULE_COUNT],
    center_of_rotation: &na::Vector2<f64>,
) -> InverseMatrix {
    let mut matrix = InverseMatrix::zeros();
    for (index, location) in locations.iter().enumerate() {
        let offset = location - center_of_rotation;
        let row = 2 * index;
        matrix[(row, 0)] = 1.0;
        matrix[(row, 2)] = -offset.y;
        matrix[(row + 1, 1)] = 1.0;
        matrix[(row + 1, 2)] = offset.x;
    }
    matrix
}
