//! MacServices facade: owns the three servers and the platform, routes firmware traffic.

use embassy_time::Duration;
use log::{error, info};

mod outbox;

pub(crate) use outbox::Outbox;
pub use outbox::{MacNotification, Notifications};

use crate::config::MacServicesConfig;
use crate::measurement::{
    MeasurementError, MeasurementRequest, MeasurementServer, MeasurementState,
    UnexpectedMeasurementEvent,
};
use crate::platform::{CommandOwner, CommandResponse, FwEvent, FwEventId, GuardTimer, MacPlatform};
use crate::power::{PowerError, PowerReply, PowerServer, PowerState, UnexpectedPowerEvent};
use crate::scan::{ScanError, ScanRequest, ScanServer, ScanState, ScanTag, UnexpectedScanEvent};
use crate::telemetry;
use crate::types::{MacFailure, PowerClient, PowerMode, RateMask};

pub type FailureHandler = fn(MacFailure);

// Splits the facade into disjoint borrows so a server can be driven alongside its env.
macro_rules! borrow_env {
    ($services:ident) => {
        Env {
            power: &mut $services.power,
            platform: &mut $services.platform,
            outbox: &mut $services.outbox,
        }
    };
}

/// Borrowed view the scan and measurement servers work through.
pub(crate) struct Env<'a, P> {
    pub(crate) power: &'a mut PowerServer,
    pub(crate) platform: &'a mut P,
    pub(crate) outbox: &'a mut Outbox,
}

/// Result of one facade call together with the notifications it produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MacOutput<T> {
    pub result: T,
    pub notifications: Notifications,
}

pub struct MacServices<P: MacPlatform> {
    platform: P,
    power: PowerServer,
    scan: ScanServer,
    measurement: MeasurementServer,
    outbox: Outbox,
    failure_handler: Option<FailureHandler>,
}

impl<P: MacPlatform> MacServices<P> {
    pub fn new(mut platform: P, config: MacServicesConfig) -> Self {
        for event in FwEventId::ALL {
            platform.unmask_event(event);
        }
        info!(
            "mac: services up ps_guard_ms={} scan_margin_ms={}",
            config.power_save_guard.as_millis(),
            config.scan_guard_margin.as_millis()
        );
        Self {
            platform,
            power: PowerServer::new(config),
            scan: ScanServer::new(config),
            measurement: MeasurementServer::new(config),
            outbox: Outbox::default(),
            failure_handler: None,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn register_failure_handler(&mut self, handler: FailureHandler) {
        self.failure_handler = Some(handler);
    }

    pub fn ps_status(&self) -> bool {
        self.power.ps_status()
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    pub fn rate_modulation(&self) -> RateMask {
        self.power.rate_modulation()
    }

    pub fn set_rate_modulation(&mut self, rate: RateMask) {
        self.power.set_rate_modulation(rate);
    }

    pub fn scan_state(&self) -> ScanState {
        self.scan.state()
    }

    pub fn measurement_state(&self) -> MeasurementState {
        self.measurement.state()
    }

    pub fn is_measurement_complete(&self) -> bool {
        self.measurement.is_measurement_complete()
    }

    pub fn power_last_error(&self) -> Option<UnexpectedPowerEvent> {
        self.power.last_error()
    }

    pub fn scan_last_error(&self) -> Option<UnexpectedScanEvent> {
        self.scan.last_error()
    }

    pub fn measurement_last_error(&self) -> Option<UnexpectedMeasurementEvent> {
        self.measurement.last_error()
    }

    pub fn set_ps_mode(
        &mut self,
        mode: PowerMode,
        send_null_data: bool,
    ) -> MacOutput<Result<PowerReply, PowerError>> {
        let result =
            self.power
                .set_ps_mode(mode, send_null_data, &mut self.platform, &mut self.outbox);
        self.finish(result)
    }

    pub fn start_scan(&mut self, request: ScanRequest) -> MacOutput<Result<(), ScanError>> {
        let mut env = borrow_env!(self);
        let result = self.scan.start_scan(request, &mut env);
        self.finish(result)
    }

    pub fn stop_scan(&mut self, tag: ScanTag, send_null_data: bool) -> MacOutput<()> {
        let mut env = borrow_env!(self);
        self.scan.stop_scan(tag, send_null_data, &mut env);
        self.finish(())
    }

    pub fn set_scan_recovery_threshold(&mut self, threshold: u8) {
        self.scan.set_recovery_threshold(threshold);
    }

    pub fn start_measurement(
        &mut self,
        request: MeasurementRequest,
        max_delay: Duration,
    ) -> MacOutput<Result<(), MeasurementError>> {
        let mut env = borrow_env!(self);
        let result = self
            .measurement
            .start_measurement(request, max_delay, &mut env);
        self.finish(result)
    }

    pub fn stop_measurement(&mut self, send_null_data: bool) -> MacOutput<()> {
        let mut env = borrow_env!(self);
        self.measurement.stop_measurement(send_null_data, &mut env);
        self.finish(())
    }

    pub fn handle_event(&mut self, event: FwEvent) -> MacOutput<()> {
        match event {
            FwEvent::PowerSaveReport(report) => {
                self.power
                    .handle_report(report, &mut self.platform, &mut self.outbox);
            }
            FwEvent::ScanComplete(report) => {
                let mut env = borrow_env!(self);
                self.scan.scan_complete(report, false, &mut env);
            }
            FwEvent::SpsScanComplete(report) => {
                let mut env = borrow_env!(self);
                self.scan.scan_complete(report, true, &mut env);
            }
            FwEvent::MeasurementStarted => {
                let mut env = borrow_env!(self);
                self.measurement.start_complete(&mut env);
            }
            FwEvent::MeasurementComplete => {
                let mut env = borrow_env!(self);
                self.measurement.stop_complete(&mut env);
            }
        }
        self.finish(())
    }

    pub fn command_response(&mut self, response: CommandResponse) -> MacOutput<()> {
        match response.kind.owner() {
            CommandOwner::Power => {
                self.power
                    .command_response(response.status, &mut self.platform, &mut self.outbox);
            }
            CommandOwner::Scan => {
                let mut env = borrow_env!(self);
                self.scan
                    .command_response(response.kind, response.status, &mut env);
            }
            CommandOwner::Measurement => {
                let mut env = borrow_env!(self);
                self.measurement.command_response(response, &mut env);
            }
        }
        self.finish(())
    }

    pub fn timer_expired(&mut self, timer: GuardTimer, was_reset: bool) -> MacOutput<()> {
        match timer {
            GuardTimer::PowerSave => {
                self.power
                    .guard_expired(was_reset, &mut self.platform, &mut self.outbox);
            }
            GuardTimer::Scan => {
                let mut env = borrow_env!(self);
                self.scan.guard_expired(was_reset, &mut env);
            }
            GuardTimer::MeasurementStartStop => {
                let mut env = borrow_env!(self);
                self.measurement.guard_expired(was_reset, &mut env);
            }
            GuardTimer::MeasurementType(index) => {
                let mut env = borrow_env!(self);
                self.measurement.type_expired(index, was_reset, &mut env);
            }
        }
        self.finish(())
    }

    /// Firmware recovery: every server returns to its initial state without completions.
    pub fn notify_reset(&mut self) -> MacOutput<()> {
        info!("mac: firmware reset");
        telemetry::record_reset();
        let mut env = borrow_env!(self);
        self.scan.notify_reset(&mut env);
        self.measurement.notify_reset(&mut env);
        self.power.notify_reset(&mut self.platform);
        while self.outbox.next_power_notice().is_some() {}
        self.finish(())
    }

    fn finish<T>(&mut self, result: T) -> MacOutput<T> {
        self.route_power_notices();
        for failure in self.outbox.take_failures() {
            match self.failure_handler {
                Some(handler) => handler(failure),
                None => error!("mac: unhandled failure {:?}: {}", failure, failure),
            }
        }
        MacOutput {
            result,
            notifications: self.outbox.take_notifications(),
        }
    }

    fn route_power_notices(&mut self) {
        while let Some(notice) = self.outbox.next_power_notice() {
            match notice.client {
                PowerClient::User => {
                    self.outbox
                        .notify(MacNotification::PowerSaveComplete(notice.transition));
                }
                PowerClient::Scan => {
                    let mut env = borrow_env!(self);
                    self.scan.power_save_complete(notice.transition, &mut env);
                }
                PowerClient::Measurement => {
                    let mut env = borrow_env!(self);
                    self.measurement
                        .driver_mode_complete(notice.transition, &mut env);
                }
            }
        }
    }
}
