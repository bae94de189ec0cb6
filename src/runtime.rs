//! Async driver loop: one task owns the facade and feeds it from a channel.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_time::{Duration, Instant, Timer};
use log::{debug, warn};

use crate::measurement::MeasurementRequest;
use crate::platform::{
    Clock, CommandChannel, CommandError, CommandResponse, EventChannel, FwCommand, FwEvent,
    FwEventId, GuardTimer, GuardTimers, MacPlatform,
};
use crate::scan::{ScanRequest, ScanTag};
use crate::services::{MacNotification, MacServices, Notifications};
use crate::types::PowerMode;

/// Everything that can wake the driver loop besides a guard timer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MacInput {
    Event(FwEvent),
    Response(CommandResponse),
    SetPsMode {
        mode: PowerMode,
        send_null_data: bool,
    },
    StartScan(ScanRequest),
    StopScan {
        tag: ScanTag,
        send_null_data: bool,
    },
    StartMeasurement {
        request: MeasurementRequest,
        max_delay: Duration,
    },
    StopMeasurement {
        send_null_data: bool,
    },
    Reset,
}

/// Wraps a firmware link and keeps guard timers as deadlines for [`run`] to await.
pub struct EmbassyPlatform<F> {
    firmware: F,
    deadlines: [Option<Instant>; GuardTimer::COUNT],
}

impl<F> EmbassyPlatform<F> {
    pub const fn new(firmware: F) -> Self {
        Self {
            firmware,
            deadlines: [None; GuardTimer::COUNT],
        }
    }

    pub fn firmware(&self) -> &F {
        &self.firmware
    }

    pub fn firmware_mut(&mut self) -> &mut F {
        &mut self.firmware
    }

    /// Earliest armed guard timer.
    pub fn next_deadline(&self) -> Option<(GuardTimer, Instant)> {
        self.deadlines
            .iter()
            .enumerate()
            .filter_map(|(slot, deadline)| Some((GuardTimer::from_slot(slot)?, (*deadline)?)))
            .min_by_key(|(_, deadline)| *deadline)
    }

    fn disarm(&mut self, timer: GuardTimer) {
        if let Some(deadline) = self.deadlines.get_mut(timer.slot()) {
            *deadline = None;
        }
    }
}

impl<F: CommandChannel> CommandChannel for EmbassyPlatform<F> {
    fn send_command(&mut self, command: &FwCommand) -> Result<(), CommandError> {
        self.firmware.send_command(command)
    }
}

impl<F: EventChannel> EventChannel for EmbassyPlatform<F> {
    fn unmask_event(&mut self, event: FwEventId) {
        self.firmware.unmask_event(event);
    }
}

impl<F> GuardTimers for EmbassyPlatform<F> {
    fn start_timer(&mut self, timer: GuardTimer, interval: Duration) {
        if let Some(deadline) = self.deadlines.get_mut(timer.slot()) {
            *deadline = Some(Instant::now().checked_add(interval).unwrap_or(Instant::MAX));
        }
    }

    fn stop_timer(&mut self, timer: GuardTimer) {
        self.disarm(timer);
    }
}

impl<F> Clock for EmbassyPlatform<F> {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Drives `mac` forever: inputs and timer expiries in, notifications out.
pub async fn run<F, M, const N: usize, const O: usize>(
    mac: &mut MacServices<EmbassyPlatform<F>>,
    inputs: Receiver<'_, M, MacInput, N>,
    outputs: Sender<'_, M, MacNotification, O>,
) -> !
where
    F: CommandChannel + EventChannel,
    M: RawMutex,
{
    loop {
        let notifications = match mac.platform().next_deadline() {
            Some((timer, deadline)) => match select(inputs.receive(), Timer::at(deadline)).await {
                Either::First(input) => apply(mac, input),
                Either::Second(()) => {
                    debug!("mac: guard expired timer={:?}", timer);
                    // Cleared first so a re-arm from the handler survives.
                    mac.platform_mut().disarm(timer);
                    mac.timer_expired(timer, false).notifications
                }
            },
            None => {
                let input = inputs.receive().await;
                apply(mac, input)
            }
        };
        for notification in notifications {
            outputs.send(notification).await;
        }
    }
}

fn apply<P: MacPlatform>(mac: &mut MacServices<P>, input: MacInput) -> Notifications {
    match input {
        MacInput::Event(event) => mac.handle_event(event).notifications,
        MacInput::Response(response) => mac.command_response(response).notifications,
        MacInput::SetPsMode {
            mode,
            send_null_data,
        } => {
            let output = mac.set_ps_mode(mode, send_null_data);
            if let Err(err) = output.result {
                warn!("mac: set_ps_mode failed err={}", err);
            }
            output.notifications
        }
        MacInput::StartScan(request) => {
            let output = mac.start_scan(request);
            if let Err(err) = output.result {
                warn!("mac: start_scan failed err={}", err);
            }
            output.notifications
        }
        MacInput::StopScan {
            tag,
            send_null_data,
        } => mac.stop_scan(tag, send_null_data).notifications,
        MacInput::StartMeasurement { request, max_delay } => {
            let output = mac.start_measurement(request, max_delay);
            if let Err(err) = output.result {
                warn!("mac: start_measurement failed err={}", err);
            }
            output.notifications
        }
        MacInput::StopMeasurement { send_null_data } => {
            mac.stop_measurement(send_null_data).notifications
        }
        MacInput::Reset => mac.notify_reset().notifications,
    }
}
