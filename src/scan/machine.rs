use heapless::Vec;
use log::{debug, warn};
use statig::prelude::*;

use super::types::{ScanRequest, ScanState, ScanStatus};
use crate::platform::ScanCompleteEvent;
use crate::types::CommandStatus;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum ScanEvent {
    Start(ScanRequest),
    PowerSaveSuccess,
    PowerSaveFail,
    Stop { send_null_data: bool },
    GuardExpired,
    /// `report` is `None` for completions synthesized locally.
    ScanComplete {
        report: Option<ScanCompleteEvent>,
        status: ScanStatus,
    },
    CommandResponse(CommandStatus),
    CommandRejected,
    FirmwareReset,
}

impl ScanEvent {
    pub(super) const fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "Start",
            Self::PowerSaveSuccess => "PowerSaveSuccess",
            Self::PowerSaveFail => "PowerSaveFail",
            Self::Stop { .. } => "Stop",
            Self::GuardExpired => "GuardExpired",
            Self::ScanComplete { .. } => "ScanComplete",
            Self::CommandResponse(_) => "CommandResponse",
            Self::CommandRejected => "CommandRejected",
            Self::FirmwareReset => "FirmwareReset",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum ScanAction {
    Reserve,
    Release,
    SendScan,
    SendStop,
    ArmGuard,
    DisarmGuard,
    ConsultRecovery,
    RecoveryReset,
    Notify,
    Raise(ScanEvent),
    Unexpected { state: ScanState, event: &'static str },
}

pub(super) type ScanActions = Vec<ScanAction, 6>;

#[derive(Default)]
pub(super) struct DispatchContext {
    pub(super) actions: ScanActions,
}

impl DispatchContext {
    fn push(&mut self, action: ScanAction) {
        if let Err(dropped) = self.actions.push(action) {
            warn!("scan: action buffer full dropped={:?}", dropped);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(super) struct ScanSession {
    pub(super) request: ScanRequest,
    pub(super) exit_driver_mode: bool,
    pub(super) send_null_data: bool,
    pub(super) result_count: u8,
    pub(super) scanned_channels: u16,
    pub(super) tsf_error: bool,
    pub(super) status: ScanStatus,
    pub(super) guard_running: bool,
    pub(super) command_in_flight: bool,
    pub(super) stop_deferred: bool,
    pub(super) stop_requested: bool,
}

impl ScanSession {
    fn begin(request: &ScanRequest) -> Self {
        Self {
            request: request.clone(),
            exit_driver_mode: request.driver_mode,
            send_null_data: request.send_null_data,
            ..Self::default()
        }
    }
}

pub(super) struct ScanSm {
    pub(super) state_id: ScanState,
    pub(super) session: ScanSession,
    /// A release was issued for an abandoned scan; its notice is dropped on arrival.
    pub(super) absorb_power_notice: bool,
}

impl ScanSm {
    pub(super) fn new() -> Self {
        Self {
            state_id: ScanState::Idle,
            session: ScanSession::default(),
            absorb_power_notice: false,
        }
    }

    fn enter(&mut self, state: ScanState) {
        debug!("scan: transition from={:?} to={:?}", self.state_id, state);
        self.state_id = state;
    }

    fn go_idle(&mut self) -> Outcome<State> {
        self.enter(ScanState::Idle);
        Transition(State::idle())
    }

    fn go_exit_power_save(&mut self, context: &mut DispatchContext) -> Outcome<State> {
        if self.session.exit_driver_mode {
            context.push(ScanAction::Release);
        } else {
            context.push(ScanAction::Raise(ScanEvent::PowerSaveSuccess));
        }
        self.enter(ScanState::ExitPowerSave);
        Transition(State::exit_power_save())
    }

    fn begin_scanning(&mut self, context: &mut DispatchContext) -> Outcome<State> {
        context.push(ScanAction::SendScan);
        context.push(ScanAction::ArmGuard);
        self.session.guard_running = true;
        self.session.command_in_flight = true;
        self.enter(ScanState::Scanning);
        Transition(State::scanning())
    }

    fn disarm_guard(&mut self, context: &mut DispatchContext) {
        if self.session.guard_running {
            context.push(ScanAction::DisarmGuard);
            self.session.guard_running = false;
        }
    }

    fn complete(
        &mut self,
        context: &mut DispatchContext,
        report: Option<ScanCompleteEvent>,
        status: ScanStatus,
    ) -> Outcome<State> {
        self.disarm_guard(context);
        if let Some(report) = report {
            context.push(ScanAction::RecoveryReset);
            self.session.result_count = report.result_count;
            self.session.scanned_channels = report.scanned_channels;
            self.session.tsf_error = report.tsf_error;
        }
        self.session.status = if self.session.stop_requested {
            ScanStatus::Stopped
        } else {
            status
        };
        self.session.stop_deferred = false;
        self.go_exit_power_save(context)
    }

    fn guard_expired(&mut self, context: &mut DispatchContext) -> Outcome<State> {
        self.session.guard_running = false;
        context.push(ScanAction::ConsultRecovery);
        Handled
    }

    fn request_stop(&mut self, context: &mut DispatchContext, send_null_data: bool) {
        self.session.stop_requested = true;
        self.session.send_null_data = send_null_data;
        if self.session.command_in_flight {
            debug!("scan: stop deferred until scan command acknowledged");
            self.session.stop_deferred = true;
        } else {
            context.push(ScanAction::SendStop);
            self.session.command_in_flight = true;
        }
    }

    fn reset(&mut self, context: &mut DispatchContext) -> Outcome<State> {
        self.disarm_guard(context);
        self.session = ScanSession::default();
        self.absorb_power_notice = false;
        self.go_idle()
    }

    /// Busy states drop the operation on an event they cannot place.
    fn abandon(&mut self, context: &mut DispatchContext, event: &ScanEvent) -> Outcome<State> {
        context.push(ScanAction::Unexpected {
            state: self.state_id,
            event: event.name(),
        });
        self.disarm_guard(context);
        if self.session.exit_driver_mode {
            context.push(ScanAction::Release);
            self.absorb_power_notice = true;
        }
        self.session = ScanSession::default();
        self.go_idle()
    }
}

#[state_machine(initial = "State::idle()")]
impl ScanSm {
    #[state]
    fn idle(&mut self, context: &mut DispatchContext, event: &ScanEvent) -> Outcome<State> {
        match event {
            ScanEvent::Start(request) => {
                self.session = ScanSession::begin(request);
                self.enter(ScanState::WaitPowerSave);
                if request.driver_mode {
                    context.push(ScanAction::Reserve);
                } else {
                    context.push(ScanAction::Raise(ScanEvent::PowerSaveSuccess));
                }
                Transition(State::wait_power_save())
            }
            ScanEvent::PowerSaveSuccess | ScanEvent::PowerSaveFail if self.absorb_power_notice => {
                self.absorb_power_notice = false;
                Handled
            }
            ScanEvent::FirmwareReset => {
                self.absorb_power_notice = false;
                Handled
            }
            ScanEvent::Stop { .. } | ScanEvent::GuardExpired | ScanEvent::CommandResponse(_) => {
                debug!("scan: idle ignores {}", event.name());
                Handled
            }
            _ => {
                context.push(ScanAction::Unexpected {
                    state: ScanState::Idle,
                    event: event.name(),
                });
                Handled
            }
        }
    }

    #[state]
    fn wait_power_save(
        &mut self,
        context: &mut DispatchContext,
        event: &ScanEvent,
    ) -> Outcome<State> {
        match event {
            // Release notice of an abandoned scan, queued ahead of this reservation.
            ScanEvent::PowerSaveSuccess | ScanEvent::PowerSaveFail if self.absorb_power_notice => {
                self.absorb_power_notice = false;
                Handled
            }
            ScanEvent::PowerSaveSuccess => self.begin_scanning(context),
            ScanEvent::PowerSaveFail => {
                self.session.exit_driver_mode = false;
                if self.session.request.scan_on_driver_failure {
                    warn!("scan: driver mode failed, scanning anyway");
                    return self.begin_scanning(context);
                }
                self.session.status = ScanStatus::DriverModeFailed;
                context.push(ScanAction::Notify);
                self.go_idle()
            }
            ScanEvent::Stop { send_null_data } => {
                self.session.stop_requested = true;
                self.session.send_null_data = *send_null_data;
                self.session.status = ScanStatus::Stopped;
                self.go_exit_power_save(context)
            }
            ScanEvent::GuardExpired | ScanEvent::CommandResponse(_) => Handled,
            ScanEvent::FirmwareReset => self.reset(context),
            _ => self.abandon(context, event),
        }
    }

    #[state]
    fn scanning(&mut self, context: &mut DispatchContext, event: &ScanEvent) -> Outcome<State> {
        match event {
            ScanEvent::ScanComplete { report, status } => self.complete(context, *report, *status),
            ScanEvent::GuardExpired => self.guard_expired(context),
            ScanEvent::Stop { send_null_data } => {
                self.request_stop(context, *send_null_data);
                self.enter(ScanState::Stopping);
                Transition(State::stopping())
            }
            ScanEvent::CommandResponse(status) => {
                self.session.command_in_flight = false;
                if !status.is_ok() {
                    context.push(ScanAction::Raise(ScanEvent::ScanComplete {
                        report: None,
                        status: ScanStatus::CommandFailed,
                    }));
                }
                Handled
            }
            ScanEvent::CommandRejected => {
                self.session.command_in_flight = false;
                context.push(ScanAction::Raise(ScanEvent::ScanComplete {
                    report: None,
                    status: ScanStatus::CommandFailed,
                }));
                Handled
            }
            ScanEvent::PowerSaveFail => {
                warn!("scan: driver mode lost while scanning");
                self.session.exit_driver_mode = false;
                Handled
            }
            ScanEvent::FirmwareReset => self.reset(context),
            _ => self.abandon(context, event),
        }
    }

    #[state]
    fn stopping(&mut self, context: &mut DispatchContext, event: &ScanEvent) -> Outcome<State> {
        match event {
            ScanEvent::ScanComplete { report, status } => self.complete(context, *report, *status),
            ScanEvent::GuardExpired => self.guard_expired(context),
            ScanEvent::Stop { .. } => Handled,
            ScanEvent::CommandResponse(status) => {
                self.session.command_in_flight = false;
                if !status.is_ok() {
                    context.push(ScanAction::Raise(ScanEvent::ScanComplete {
                        report: None,
                        status: ScanStatus::CommandFailed,
                    }));
                } else if self.session.stop_deferred {
                    self.session.stop_deferred = false;
                    context.push(ScanAction::SendStop);
                    self.session.command_in_flight = true;
                }
                Handled
            }
            ScanEvent::CommandRejected => {
                self.session.command_in_flight = false;
                context.push(ScanAction::Raise(ScanEvent::ScanComplete {
                    report: None,
                    status: ScanStatus::CommandFailed,
                }));
                Handled
            }
            ScanEvent::PowerSaveFail => {
                self.session.exit_driver_mode = false;
                Handled
            }
            ScanEvent::FirmwareReset => self.reset(context),
            _ => self.abandon(context, event),
        }
    }

    #[state]
    fn exit_power_save(
        &mut self,
        context: &mut DispatchContext,
        event: &ScanEvent,
    ) -> Outcome<State> {
        match event {
            ScanEvent::PowerSaveSuccess | ScanEvent::PowerSaveFail => {
                context.push(ScanAction::Notify);
                self.go_idle()
            }
            ScanEvent::ScanComplete { .. } => {
                debug!("scan: late scan complete ignored");
                Handled
            }
            ScanEvent::Stop { .. }
            | ScanEvent::GuardExpired
            | ScanEvent::CommandResponse(_)
            | ScanEvent::CommandRejected => Handled,
            ScanEvent::FirmwareReset => self.reset(context),
            _ => self.abandon(context, event),
        }
    }
}
