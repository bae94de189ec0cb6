use embassy_time::{Duration, Instant};
use macservices::platform::{
    Clock, CommandChannel, CommandError, CommandKind, EventChannel, FwCommand, FwEventId,
    GuardTimer, GuardTimers,
};

/// Prints every firmware interaction as it happens and keeps a virtual clock.
pub struct ScriptedPlatform {
    now: Instant,
    rejected: Vec<CommandKind>,
    running: Vec<(GuardTimer, Instant)>,
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self {
            now: Instant::from_millis(0),
            rejected: Vec::new(),
            running: Vec::new(),
        }
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn reject(&mut self, kind: CommandKind) {
        if !self.rejected.contains(&kind) {
            self.rejected.push(kind);
        }
    }

    pub fn accept_all(&mut self) {
        self.rejected.clear();
    }

    /// Drops `timer` ahead of its expiry; reports whether it was armed.
    pub fn fire(&mut self, timer: GuardTimer) -> bool {
        let armed = self.running.iter().any(|(running, _)| *running == timer);
        self.running.retain(|(running, _)| *running != timer);
        armed
    }

    /// Disarms and returns every timer whose deadline has passed, earliest first.
    pub fn take_expired(&mut self) -> Vec<GuardTimer> {
        let mut expired: Vec<(GuardTimer, Instant)> = self
            .running
            .iter()
            .copied()
            .filter(|(_, deadline)| *deadline <= self.now)
            .collect();
        expired.sort_by_key(|(_, deadline)| *deadline);
        self.running.retain(|(_, deadline)| *deadline > self.now);
        expired.into_iter().map(|(timer, _)| timer).collect()
    }

    fn ms(&self) -> u64 {
        self.now.as_millis()
    }
}

impl CommandChannel for ScriptedPlatform {
    fn send_command(&mut self, command: &FwCommand) -> Result<(), CommandError> {
        if self.rejected.contains(&command.kind()) {
            println!("command,{},rejected,{:?}", self.ms(), command.kind());
            return Err(CommandError::MailboxFull);
        }
        println!("command,{},{:?}", self.ms(), command);
        Ok(())
    }
}

impl EventChannel for ScriptedPlatform {
    fn unmask_event(&mut self, event: FwEventId) {
        println!("unmask,{},{:?}", self.ms(), event);
    }
}

impl GuardTimers for ScriptedPlatform {
    fn start_timer(&mut self, timer: GuardTimer, interval: Duration) {
        let deadline = self.now + interval;
        self.running.retain(|(running, _)| *running != timer);
        self.running.push((timer, deadline));
        println!(
            "timer,{},start,{:?},{}",
            self.ms(),
            timer,
            interval.as_millis()
        );
    }

    fn stop_timer(&mut self, timer: GuardTimer) {
        self.running.retain(|(running, _)| *running != timer);
        println!("timer,{},stop,{:?}", self.ms(), timer);
    }
}

impl Clock for ScriptedPlatform {
    fn now(&self) -> Instant {
        self.now
    }
}
