#![doc = include_str!("../README.md")]
pub mod bus;
pub mod commands;
pub mod configuration;
pub mod context;
pub mod dashboard;
pub mod driver;
pub mod drivetrain;
pub mod error;
pub mod geometry;
pub mod input;
pub mod kinematics;
pub mod logging;
pub mod module;
pub mod pid;
pub mod pose_estimator;
pub mod robot;
pub mod util;
