//! Commands and the scheduler that runs them.
//!
//! A command claims one or more subsystems for as long as it runs. The
//! scheduler hands each subsystem to at most one command at a time and falls
//! back to the subsystem's default command whenever it is free.

pub mod scheduler;
pub mod teleop_drive;
pub mod turn_in_place;

pub use scheduler::{BindingKind, CommandId, CommandScheduler};
pub use teleop_drive::TeleopDrive;
pub use turn_in_place::TurnInPlace;

use crate::context::RobotContext;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Subsystem {
    Drivetrain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandState {
    Idle,
    Running,
    Finished,
    Canceled,
}

pub trait Command: Send {
    fn name(&self) -> &str;

    /// Subsystems this command needs exclusive use of.
    fn requirements(&self) -> &[Subsystem] {
        &[]
    }

    fn initialize(&mut self, _ctx: &mut RobotContext) {}

    fn execute(&mut self, ctx: &mut RobotContext);

    fn is_finished(&self, _ctx: &RobotContext) -> bool {
        false
    }

    /// `interrupted` is true when the command was canceled or preempted.
    fn end(&mut self, _ctx: &mut RobotContext, _interrupted: bool) {}
}

type Action = Box<dyn FnMut(&mut RobotContext) + Send>;

/// Runs an action once when scheduled and finishes in the same cycle.
pub struct InstantCommand {
    name: String,
    requirements: Vec<Subsystem>,
    action: Action,
}

impl InstantCommand {
    pub fn new(name: &str, action: impl FnMut(&mut RobotContext) + Send + 'static) -> Self {
        Self {
            name: name.to_owned(),
            requirements: vec![],
            action: Box::new(action),
        }
    }

    pub fn requiring(mut self, subsystem: Subsystem) -> Self {
        self.requirements.push(subsystem);
        self
    }
}

impl Command for InstantCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn requirements(&self) -> &[Subsystem] {
        &self.requirements
    }

    fn initialize(&mut self, ctx: &mut RobotContext) {
        (self.action)(ctx);
    }

    fn execute(&mut self, _ctx: &mut RobotContext) {}

    fn is_finished(&self, _ctx: &RobotContext) -> bool {
        true
    }
}
