use super::{Command, CommandState, Subsystem};
use crate::{context::RobotContext, error::RobotError, input::messages::Button};
use std::collections::BTreeMap;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Schedule on press.
    OnTrue,
    /// Schedule on release.
    OnFalse,
    /// Schedule on press, cancel on release.
    WhileTrue,
    /// Schedule on release, cancel on press.
    WhileFalse,
}

struct Binding {
    button: Button,
    kind: BindingKind,
    command: CommandId,
    was_pressed: bool,
}

struct Entry {
    command: Box<dyn Command>,
    state: CommandState,
}

#[derive(Default)]
pub struct CommandScheduler {
    commands: Vec<Entry>,
    /// Running commands in scheduling order.
    running: Vec<CommandId>,
    owners: BTreeMap<Subsystem, CommandId>,
    defaults: BTreeMap<Subsystem, CommandId>,
    bindings: Vec<Binding>,
}

impl CommandScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Box<dyn Command>) -> CommandId {
        let id = CommandId(self.commands.len());
        debug!(id = id.0, name = command.name(), "Command registered");
        self.commands.push(Entry {
            command,
            state: CommandState::Idle,
        });
        id
    }

    /// The command runs on `subsystem` whenever nothing else holds it.
    pub fn set_default(&mut self, subsystem: Subsystem, id: CommandId) -> Result<(), RobotError> {
        self.entry(id)?;
        self.defaults.insert(subsystem, id);
        Ok(())
    }

    pub fn bind(&mut self, button: Button, kind: BindingKind, id: CommandId) -> Result<(), RobotError> {
        self.entry(id)?;
        self.bindings.push(Binding {
            button,
            kind,
            command: id,
            was_pressed: false,
        });
        Ok(())
    }

    pub fn state(&self, id: CommandId) -> Result<CommandState, RobotError> {
        Ok(self.entry(id)?.state)
    }

    pub fn is_running(&self, id: CommandId) -> bool {
        self.running.contains(&id)
    }

    pub fn owner(&self, subsystem: Subsystem) -> Option<CommandId> {
        self.owners.get(&subsystem).copied()
    }

    pub fn running_names(&self) -> Vec<String> {
        self.running
            .iter()
            .map(|id| self.commands[id.0].command.name().to_owned())
            .collect()
    }

    fn entry(&self, id: CommandId) -> Result<&Entry, RobotError> {
        self.commands
            .get(id.0)
            .ok_or(RobotError::UnknownCommand(id.0))
    }

    /// Starts a command, interrupting whatever holds its subsystems.
    pub fn schedule(&mut self, id: CommandId, ctx: &mut RobotContext) -> Result<(), RobotError> {
        let requirements = self.entry(id)?.command.requirements().to_vec();
        if self.is_running(id) {
            return Ok(());
        }
        for subsystem in &requirements {
            if let Some(holder) = self.owners.get(subsystem).copied() {
                self.interrupt(holder, ctx);
            }
        }
        for subsystem in requirements {
            self.owners.insert(subsystem, id);
        }

        let entry = &mut self.commands[id.0];
        entry.state = CommandState::Running;
        debug!(name = entry.command.name(), "Command scheduled");
        entry.command.initialize(ctx);
        self.running.push(id);
        Ok(())
    }

    pub fn cancel(&mut self, id: CommandId, ctx: &mut RobotContext) -> Result<(), RobotError> {
        self.entry(id)?;
        self.interrupt(id, ctx);
        Ok(())
    }

    fn interrupt(&mut self, id: CommandId, ctx: &mut RobotContext) {
        if !self.is_running(id) {
            return;
        }
        let entry = &mut self.commands[id.0];
        entry.command.end(ctx, true);
        entry.state = CommandState::Canceled;
        debug!(name = entry.command.name(), "Command canceled");
        self.release(id);
    }

    fn release(&mut self, id: CommandId) {
        self.running.retain(|running| *running != id);
        self.owners.retain(|_, owner| *owner != id);
    }

    /// One scheduler pass: poll bindings, fill free subsystems with their
    /// defaults, execute every running command once and retire finished ones.
    pub fn run(&mut self, ctx: &mut RobotContext) -> Result<(), RobotError> {
        ctx.ensure_initialized()?;

        let mut to_schedule = vec![];
        let mut to_cancel = vec![];
        for binding in self.bindings.iter_mut() {
            let pressed = ctx.driver.is_pressed(binding.button);
            let rising = pressed && !binding.was_pressed;
            let falling = !pressed && binding.was_pressed;
            binding.was_pressed = pressed;
            match binding.kind {
                BindingKind::OnTrue if rising => to_schedule.push(binding.command),
                BindingKind::OnFalse if falling => to_schedule.push(binding.command),
                BindingKind::WhileTrue if rising => to_schedule.push(binding.command),
                BindingKind::WhileTrue if falling => to_cancel.push(binding.command),
                BindingKind::WhileFalse if falling => to_schedule.push(binding.command),
                BindingKind::WhileFalse if rising => to_cancel.push(binding.command),
                _ => (),
            }
        }
        for id in to_cancel {
            self.interrupt(id, ctx);
        }
        for id in to_schedule {
            self.schedule(id, ctx)?;
        }

        let defaults: Vec<(Subsystem, CommandId)> =
            self.defaults.iter().map(|(subsystem, id)| (*subsystem, *id)).collect();
        for (subsystem, id) in defaults {
            if !self.owners.contains_key(&subsystem) {
                self.schedule(id, ctx)?;
            }
        }

        for id in self.running.clone() {
            let entry = &mut self.commands[id.0];
            entry.command.execute(ctx);
            if entry.command.is_finished(ctx) {
                entry.command.end(ctx, false);
                entry.state = CommandState::Finished;
                trace!(name = entry.command.name(), "Command finished");
                self.release(id);
            }
        }
        Ok(())
    }
}
