use heapless::Deque;
use log::{debug, error, info, warn};
use statig::blocking::IntoStateMachineExt as _;

use super::duration::guard_interval;
use super::machine::{DispatchContext, ScanAction, ScanEvent, ScanSm};
use super::recovery::{RecoveryDecision, ScanRecoveryBudget};
use super::types::{
    ScanCompleteReport, ScanError, ScanRequest, ScanState, ScanStatus, ScanTag,
    UnexpectedScanEvent,
};
use crate::config::MacServicesConfig;
use crate::platform::{
    CommandKind, FwCommand, GuardTimer, MacPlatform, ScanCommand, ScanCompleteEvent,
};
use crate::power::{PowerError, PowerReply};
use crate::services::{Env, MacNotification};
use crate::telemetry;
use crate::types::{CommandStatus, DriverClient, MacFailure, PsTransition};

const EVENT_QUEUE: usize = 4;

pub(crate) struct ScanServer {
    machine: statig::blocking::StateMachine<ScanSm>,
    config: MacServicesConfig,
    recovery: ScanRecoveryBudget,
    /// Scan command sent and not yet acknowledged; outlives the session it was sent for.
    outstanding: Option<CommandKind>,
    last_error: Option<UnexpectedScanEvent>,
}

impl ScanServer {
    pub(crate) fn new(config: MacServicesConfig) -> Self {
        Self {
            machine: ScanSm::new().state_machine(),
            config,
            recovery: ScanRecoveryBudget::new(config.scan_recovery_threshold),
            outstanding: None,
            last_error: None,
        }
    }

    pub(crate) fn state(&self) -> ScanState {
        self.machine.inner().state_id
    }

    pub(crate) fn last_error(&self) -> Option<UnexpectedScanEvent> {
        self.last_error
    }

    pub(crate) fn set_recovery_threshold(&mut self, threshold: u8) {
        debug!("scan: recovery threshold={}", threshold);
        self.recovery.set_threshold(threshold);
    }

    pub(crate) fn start_scan<P: MacPlatform>(
        &mut self,
        request: ScanRequest,
        env: &mut Env<'_, P>,
    ) -> Result<(), ScanError> {
        if self.state() != ScanState::Idle {
            warn!("scan: start rejected state={:?}", self.state());
            return Err(ScanError::Busy);
        }
        if request.params.channels.is_empty() {
            return Err(ScanError::InvalidParams);
        }

        info!(
            "scan: start tag={:?} kind={:?} channels={} driver_mode={}",
            request.tag,
            request.params.kind,
            request.params.channels.len(),
            request.driver_mode
        );
        telemetry::record_scan_started();
        self.run(ScanEvent::Start(request), env);
        Ok(())
    }

    pub(crate) fn stop_scan<P: MacPlatform>(
        &mut self,
        tag: ScanTag,
        send_null_data: bool,
        env: &mut Env<'_, P>,
    ) {
        let running = self.machine.inner().session.request.tag;
        if self.state() != ScanState::Idle && running != tag {
            warn!("scan: stop tag={:?} running tag={:?}", tag, running);
        }
        self.run(ScanEvent::Stop { send_null_data }, env);
    }

    pub(crate) fn scan_complete<P: MacPlatform>(
        &mut self,
        report: ScanCompleteEvent,
        sps: bool,
        env: &mut Env<'_, P>,
    ) {
        debug!(
            "scan: firmware complete sps={} results={} tsf_error={}",
            sps, report.result_count, report.tsf_error
        );
        self.run(
            ScanEvent::ScanComplete {
                report: Some(report),
                status: ScanStatus::Success,
            },
            env,
        );
    }

    pub(crate) fn power_save_complete<P: MacPlatform>(
        &mut self,
        transition: PsTransition,
        env: &mut Env<'_, P>,
    ) {
        let event = if transition.is_success() {
            ScanEvent::PowerSaveSuccess
        } else {
            ScanEvent::PowerSaveFail
        };
        self.run(event, env);
    }

    pub(crate) fn command_response<P: MacPlatform>(
        &mut self,
        kind: CommandKind,
        status: CommandStatus,
        env: &mut Env<'_, P>,
    ) {
        if self.outstanding != Some(kind) {
            debug!(
                "scan: stale ack kind={:?} status={:?} outstanding={:?}",
                kind, status, self.outstanding
            );
            return;
        }
        self.outstanding = None;
        let tag = self.machine.inner().session.request.tag;
        env.outbox
            .notify(MacNotification::ScanCommandAccepted { tag, status });
        self.run(ScanEvent::CommandResponse(status), env);
    }

    pub(crate) fn guard_expired<P: MacPlatform>(
        &mut self,
        was_reset: bool,
        env: &mut Env<'_, P>,
    ) {
        if was_reset {
            debug!("scan: stale guard expiry ignored");
            return;
        }
        self.run(ScanEvent::GuardExpired, env);
    }

    pub(crate) fn notify_reset<P: MacPlatform>(&mut self, env: &mut Env<'_, P>) {
        self.outstanding = None;
        self.run(ScanEvent::FirmwareReset, env);
    }

    fn run<P: MacPlatform>(&mut self, event: ScanEvent, env: &mut Env<'_, P>) {
        let mut queue: Deque<ScanEvent, EVENT_QUEUE> = Deque::new();
        let _ = queue.push_back(event);
        while let Some(event) = queue.pop_front() {
            let mut context = DispatchContext::default();
            self.machine.handle_with_context(&event, &mut context);
            for action in context.actions {
                if let Some(next) = self.execute(action, env) {
                    if let Err(dropped) = queue.push_back(next) {
                        warn!("scan: event queue full dropped={}", dropped.name());
                    }
                }
            }
        }
    }

    fn execute<P: MacPlatform>(
        &mut self,
        action: ScanAction,
        env: &mut Env<'_, P>,
    ) -> Option<ScanEvent> {
        match action {
            ScanAction::Reserve => {
                let request = &self.machine.inner().session.request;
                let reply = env.power.reserve(
                    DriverClient::Scan,
                    request.power_mode,
                    request.send_null_data,
                    &mut *env.platform,
                    &mut *env.outbox,
                );
                Self::power_event(reply)
            }
            ScanAction::Release => {
                let send_null_data = self.machine.inner().session.send_null_data;
                let reply = env.power.release(
                    DriverClient::Scan,
                    send_null_data,
                    &mut *env.platform,
                    &mut *env.outbox,
                );
                Self::power_event(reply)
            }
            ScanAction::SendScan => {
                let command = self.scan_command();
                self.submit(&command, env)
            }
            ScanAction::SendStop => {
                let command = self.stop_command();
                self.submit(&command, env)
            }
            ScanAction::ArmGuard => {
                let params = &self.machine.inner().session.request.params;
                let interval =
                    guard_interval(params, self.config.dtim_listen, self.config.scan_guard_margin);
                env.platform.start_timer(GuardTimer::Scan, interval);
                None
            }
            ScanAction::DisarmGuard => {
                env.platform.stop_timer(GuardTimer::Scan);
                None
            }
            ScanAction::ConsultRecovery => self.recover(env),
            ScanAction::RecoveryReset => {
                self.recovery.on_scan_complete();
                None
            }
            ScanAction::Notify => {
                let report = self.report(env.power.ps_status());
                info!(
                    "scan: complete tag={:?} status={:?} results={}",
                    report.tag, report.status, report.result_count
                );
                telemetry::record_scan_completed();
                env.outbox.notify(MacNotification::ScanComplete(report));
                None
            }
            ScanAction::Raise(event) => Some(event),
            ScanAction::Unexpected { state, event } => {
                warn!("scan: unexpected event={} state={:?}", event, state);
                telemetry::record_unexpected_event();
                self.last_error = Some(UnexpectedScanEvent { state, event });
                None
            }
        }
    }

    fn recover<P: MacPlatform>(&mut self, env: &mut Env<'_, P>) -> Option<ScanEvent> {
        match self.recovery.on_guard_expired() {
            RecoveryDecision::Recover => {
                warn!(
                    "scan: guard expired, recovering expiries={} threshold={}",
                    self.recovery.consecutive_expiries(),
                    self.recovery.threshold()
                );
                telemetry::record_scan_guard_recovery();
                if let Some(kind) = self.outstanding {
                    debug!("scan: recovery stop skipped, {:?} unacknowledged", kind);
                } else {
                    let command = self.stop_command();
                    if self.submit(&command, env).is_some() {
                        warn!("scan: recovery stop not sent");
                    }
                }
                Some(ScanEvent::ScanComplete {
                    report: None,
                    status: ScanStatus::GuardTimeout,
                })
            }
            RecoveryDecision::Escalate => {
                error!(
                    "scan: no scan complete after {} guard expiries",
                    self.recovery.consecutive_expiries()
                );
                telemetry::record_scan_escalation();
                env.outbox.escalate(MacFailure::NoScanComplete);
                None
            }
        }
    }

    fn submit<P: MacPlatform>(
        &mut self,
        command: &FwCommand,
        env: &mut Env<'_, P>,
    ) -> Option<ScanEvent> {
        match env.platform.send_command(command) {
            Ok(()) => {
                self.outstanding = Some(command.kind());
                None
            }
            Err(err) => {
                warn!("scan: {:?} command rejected err={}", command.kind(), err);
                Some(ScanEvent::CommandRejected)
            }
        }
    }

    fn power_event(reply: Result<PowerReply, PowerError>) -> Option<ScanEvent> {
        match reply {
            Ok(PowerReply::Immediate(transition)) if transition.is_success() => {
                Some(ScanEvent::PowerSaveSuccess)
            }
            Ok(PowerReply::Immediate(_)) => Some(ScanEvent::PowerSaveFail),
            Ok(PowerReply::Deferred) => None,
            Err(err) => {
                warn!("scan: driver mode request failed err={}", err);
                Some(ScanEvent::PowerSaveFail)
            }
        }
    }

    fn scan_command(&self) -> FwCommand {
        let request = &self.machine.inner().session.request;
        let command = ScanCommand {
            tag: request.tag,
            kind: request.params.kind,
            band: request.params.band,
            high_priority: request.high_priority,
            probe_requests: request.params.probe_requests,
            channels: request.params.channels.clone(),
        };
        if request.params.kind.is_sps() {
            FwCommand::SpsScan(command)
        } else {
            FwCommand::Scan(command)
        }
    }

    fn stop_command(&self) -> FwCommand {
        let request = &self.machine.inner().session.request;
        if request.params.kind.is_sps() {
            FwCommand::StopSpsScan { tag: request.tag }
        } else {
            FwCommand::StopScan { tag: request.tag }
        }
    }

    fn report(&self, power_save: bool) -> ScanCompleteReport {
        let session = &self.machine.inner().session;
        ScanCompleteReport {
            tag: session.request.tag,
            result_count: session.result_count,
            scanned_channels: session.scanned_channels,
            tsf_error: session.tsf_error,
            status: session.status,
            power_save,
        }
    }
}
