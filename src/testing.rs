//! Recording platform double for host tests.

use embassy_time::{Duration, Instant};

use crate::platform::{
    Clock, CommandChannel, CommandError, CommandKind, EventChannel, FwCommand, FwEventId,
    GuardTimer, GuardTimers,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerOp {
    Start(GuardTimer, Duration),
    Stop(GuardTimer),
}

pub(crate) struct FakePlatform {
    pub(crate) commands: Vec<FwCommand>,
    pub(crate) timer_ops: Vec<TimerOp>,
    pub(crate) running: Vec<(GuardTimer, Duration)>,
    pub(crate) unmasked: Vec<FwEventId>,
    pub(crate) rejected: Vec<CommandKind>,
    pub(crate) now: Instant,
}

impl FakePlatform {
    pub(crate) fn new() -> Self {
        Self {
            commands: Vec::new(),
            timer_ops: Vec::new(),
            running: Vec::new(),
            unmasked: Vec::new(),
            rejected: Vec::new(),
            now: Instant::from_millis(1_000),
        }
    }

    pub(crate) fn reject(&mut self, kind: CommandKind) {
        self.rejected.push(kind);
    }

    pub(crate) fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub(crate) fn is_running(&self, timer: GuardTimer) -> bool {
        self.running.iter().any(|(running, _)| *running == timer)
    }

    pub(crate) fn interval(&self, timer: GuardTimer) -> Option<Duration> {
        self.running
            .iter()
            .find(|(running, _)| *running == timer)
            .map(|(_, interval)| *interval)
    }

    pub(crate) fn kinds(&self) -> Vec<CommandKind> {
        self.commands.iter().map(FwCommand::kind).collect()
    }

    pub(crate) fn last_command(&self) -> Option<&FwCommand> {
        self.commands.last()
    }

    pub(crate) fn clear_commands(&mut self) {
        self.commands.clear();
    }
}

impl CommandChannel for FakePlatform {
    fn send_command(&mut self, command: &FwCommand) -> Result<(), CommandError> {
        if self.rejected.contains(&command.kind()) {
            return Err(CommandError::MailboxFull);
        }
        self.commands.push(command.clone());
        Ok(())
    }
}

impl EventChannel for FakePlatform {
    fn unmask_event(&mut self, event: FwEventId) {
        self.unmasked.push(event);
    }
}

impl GuardTimers for FakePlatform {
    fn start_timer(&mut self, timer: GuardTimer, interval: Duration) {
        self.timer_ops.push(TimerOp::Start(timer, interval));
        self.running.retain(|(running, _)| *running != timer);
        self.running.push((timer, interval));
    }

    fn stop_timer(&mut self, timer: GuardTimer) {
        self.timer_ops.push(TimerOp::Stop(timer));
        self.running.retain(|(running, _)| *running != timer);
    }
}

impl Clock for FakePlatform {
    fn now(&self) -> Instant {
        self.now
    }
}
