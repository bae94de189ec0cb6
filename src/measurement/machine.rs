use embassy_time::{Duration, Instant};
use heapless::Vec;
use log::{debug, warn};
use statig::prelude::*;

use super::types::{
    MeasurementReply, MeasurementRequest, MeasurementState, MeasurementStatus,
    MeasurementTypeRequest, MeasurementValue, TypeReply, MAX_MEASUREMENT_TYPES,
};
use crate::types::{Band, PowerMode};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum MeasurementEvent {
    Start {
        request: MeasurementRequest,
        deadline: Option<Instant>,
    },
    DriverModeSuccess {
        now: Instant,
    },
    DriverModeFailure,
    StartSuccess,
    StartFailure,
    TypeStartFailed(u8),
    TypeExpired(u8),
    ReadResult {
        index: u8,
        status: MeasurementStatus,
        value: MeasurementValue,
    },
    AllTypesComplete,
    StopRequest {
        send_null_data: bool,
    },
    StopComplete,
    GuardExpired,
    FirmwareReset,
}

impl MeasurementEvent {
    pub(super) const fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "Start",
            Self::DriverModeSuccess { .. } => "DriverModeSuccess",
            Self::DriverModeFailure => "DriverModeFailure",
            Self::StartSuccess => "StartSuccess",
            Self::StartFailure => "StartFailure",
            Self::TypeStartFailed(_) => "TypeStartFailed",
            Self::TypeExpired(_) => "TypeExpired",
            Self::ReadResult { .. } => "ReadResult",
            Self::AllTypesComplete => "AllTypesComplete",
            Self::StopRequest { .. } => "StopRequest",
            Self::StopComplete => "StopComplete",
            Self::GuardExpired => "GuardExpired",
            Self::FirmwareReset => "FirmwareReset",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum MeasurementAction {
    Reserve(PowerMode),
    Release {
        send_null_data: bool,
    },
    SendStart {
        channel: u8,
        band: Band,
        duration: Duration,
    },
    SendStop,
    /// Send the type's start sub-command and arm its duration timer.
    StartType {
        index: u8,
        request: MeasurementTypeRequest,
    },
    /// Duration elapsed: stop sub-command, then read back when the kind needs it.
    FinishType {
        index: u8,
        request: MeasurementTypeRequest,
    },
    /// Caller stop: disarm the duration timer and send the stop sub-command.
    StopType {
        index: u8,
        request: MeasurementTypeRequest,
    },
    DisarmTypeTimer(u8),
    ArmGuard,
    DisarmGuard,
    Notify(MeasurementReply),
    RejectLate,
    Escalate,
    Raise(MeasurementEvent),
    Unexpected {
        state: MeasurementState,
        event: &'static str,
    },
}

pub(super) type MeasurementActions = Vec<MeasurementAction, 12>;

#[derive(Default)]
pub(super) struct DispatchContext {
    pub(super) actions: MeasurementActions,
}

impl DispatchContext {
    fn push(&mut self, action: MeasurementAction) {
        if let Err(dropped) = self.actions.push(action) {
            warn!("measure: action buffer full dropped={:?}", dropped);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct TypeSlot {
    pub(super) request: MeasurementTypeRequest,
    pub(super) status: MeasurementStatus,
    pub(super) value: MeasurementValue,
    pub(super) finished: bool,
    pub(super) timer_running: bool,
    pub(super) read_pending: bool,
}

impl TypeSlot {
    fn new(request: MeasurementTypeRequest) -> Self {
        Self {
            request,
            status: MeasurementStatus::Success,
            value: MeasurementValue::None,
            finished: false,
            timer_running: false,
            read_pending: false,
        }
    }

    fn resolve(&mut self, status: MeasurementStatus, value: MeasurementValue) {
        self.status = status;
        self.value = value;
        self.finished = true;
        self.timer_running = false;
        self.read_pending = false;
    }
}

#[derive(Clone, Debug, Default)]
pub(super) struct MeasurementSession {
    pub(super) channel: u8,
    pub(super) band: Band,
    pub(super) deadline: Option<Instant>,
    pub(super) slots: Vec<TypeSlot, MAX_MEASUREMENT_TYPES>,
    pub(super) send_null_data: bool,
    pub(super) guard_running: bool,
    pub(super) stop_deferred: bool,
}

impl MeasurementSession {
    fn begin(request: &MeasurementRequest, deadline: Option<Instant>) -> Self {
        Self {
            channel: request.channel,
            band: request.band,
            deadline,
            slots: request.types.iter().copied().map(TypeSlot::new).collect(),
            ..Self::default()
        }
    }

    fn total_duration(&self) -> Duration {
        self.slots
            .iter()
            .map(|slot| slot.request.duration)
            .max()
            .unwrap_or(Duration::from_ticks(0))
    }

    pub(super) fn all_types_done(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| !slot.timer_running && !slot.read_pending)
    }

    pub(super) fn slot(&self, index: u8) -> Option<&TypeSlot> {
        self.slots.get(usize::from(index))
    }

    fn slot_mut(&mut self, index: u8) -> Option<&mut TypeSlot> {
        self.slots.get_mut(usize::from(index))
    }

    fn reply(&self) -> MeasurementReply {
        MeasurementReply {
            channel: self.channel,
            types: self
                .slots
                .iter()
                .map(|slot| TypeReply {
                    kind: slot.request.kind,
                    status: slot.status,
                    value: slot.value,
                })
                .collect(),
        }
    }
}

pub(super) struct MeasurementSm {
    pub(super) state_id: MeasurementState,
    pub(super) session: MeasurementSession,
    /// A release was issued without waiting; its notice is dropped on arrival.
    pub(super) absorb_power_notice: bool,
}

impl MeasurementSm {
    pub(super) fn new() -> Self {
        Self {
            state_id: MeasurementState::Idle,
            session: MeasurementSession::default(),
            absorb_power_notice: false,
        }
    }

    fn enter(&mut self, state: MeasurementState) {
        debug!("measure: transition from={:?} to={:?}", self.state_id, state);
        self.state_id = state;
    }

    fn go_idle(&mut self) -> Outcome<State> {
        self.session = MeasurementSession::default();
        self.enter(MeasurementState::Idle);
        Transition(State::idle())
    }

    fn arm_guard(&mut self, context: &mut DispatchContext) {
        context.push(MeasurementAction::ArmGuard);
        self.session.guard_running = true;
    }

    fn disarm_guard(&mut self, context: &mut DispatchContext) {
        if self.session.guard_running {
            context.push(MeasurementAction::DisarmGuard);
            self.session.guard_running = false;
        }
    }

    fn disarm_all(&mut self, context: &mut DispatchContext) {
        self.disarm_guard(context);
        for (index, slot) in self.session.slots.iter_mut().enumerate() {
            if slot.timer_running {
                context.push(MeasurementAction::DisarmTypeTimer(index as u8));
                slot.timer_running = false;
            }
        }
    }

    fn resolve_all(&mut self, status: MeasurementStatus) {
        for slot in self.session.slots.iter_mut().filter(|slot| !slot.finished) {
            slot.resolve(status, MeasurementValue::None);
        }
    }

    /// Releases without waiting, reports the reply and returns to idle.
    fn finish(&mut self, context: &mut DispatchContext, release: bool) -> Outcome<State> {
        if release {
            context.push(MeasurementAction::Release {
                send_null_data: self.session.send_null_data,
            });
            self.absorb_power_notice = true;
        }
        context.push(MeasurementAction::Notify(self.session.reply()));
        self.go_idle()
    }

    fn send_stop(&mut self, context: &mut DispatchContext) -> Outcome<State> {
        context.push(MeasurementAction::SendStop);
        self.arm_guard(context);
        self.enter(MeasurementState::WaitMeasureStop);
        Transition(State::wait_measure_stop())
    }

    fn fatal(&mut self, context: &mut DispatchContext) -> Outcome<State> {
        self.session.guard_running = false;
        self.disarm_all(context);
        context.push(MeasurementAction::Release {
            send_null_data: self.session.send_null_data,
        });
        self.absorb_power_notice = true;
        context.push(MeasurementAction::Escalate);
        self.go_idle()
    }

    fn check_complete(&mut self, context: &mut DispatchContext) {
        if self.session.all_types_done() {
            context.push(MeasurementAction::Raise(MeasurementEvent::AllTypesComplete));
        }
    }

    fn reset(&mut self, context: &mut DispatchContext) -> Outcome<State> {
        self.disarm_all(context);
        self.absorb_power_notice = false;
        self.go_idle()
    }

    fn abandon(
        &mut self,
        context: &mut DispatchContext,
        event: &MeasurementEvent,
    ) -> Outcome<State> {
        context.push(MeasurementAction::Unexpected {
            state: self.state_id,
            event: event.name(),
        });
        self.disarm_all(context);
        context.push(MeasurementAction::Release {
            send_null_data: self.session.send_null_data,
        });
        self.absorb_power_notice = true;
        self.go_idle()
    }
}

#[state_machine(initial = "State::idle()")]
impl MeasurementSm {
    #[state]
    fn idle(&mut self, context: &mut DispatchContext, event: &MeasurementEvent) -> Outcome<State> {
        match event {
            MeasurementEvent::Start { request, deadline } => {
                self.session = MeasurementSession::begin(request, *deadline);
                // Staying on the serving channel keeps the current power policy.
                let mode = if request.channel == request.serving_channel {
                    PowerMode::KeepCurrent
                } else {
                    PowerMode::PowerSave
                };
                context.push(MeasurementAction::Reserve(mode));
                self.enter(MeasurementState::WaitDriverMode);
                Transition(State::wait_driver_mode())
            }
            MeasurementEvent::DriverModeSuccess { .. } | MeasurementEvent::DriverModeFailure
                if self.absorb_power_notice =>
            {
                self.absorb_power_notice = false;
                Handled
            }
            MeasurementEvent::FirmwareReset => {
                self.absorb_power_notice = false;
                Handled
            }
            MeasurementEvent::StopRequest { .. }
            | MeasurementEvent::GuardExpired
            | MeasurementEvent::TypeExpired(_)
            | MeasurementEvent::ReadResult { .. } => {
                debug!("measure: idle ignores {}", event.name());
                Handled
            }
            _ => {
                context.push(MeasurementAction::Unexpected {
                    state: MeasurementState::Idle,
                    event: event.name(),
                });
                Handled
            }
        }
    }

    #[state]
    fn wait_driver_mode(
        &mut self,
        context: &mut DispatchContext,
        event: &MeasurementEvent,
    ) -> Outcome<State> {
        match event {
            MeasurementEvent::DriverModeSuccess { .. } | MeasurementEvent::DriverModeFailure
                if self.absorb_power_notice =>
            {
                self.absorb_power_notice = false;
                Handled
            }
            MeasurementEvent::DriverModeSuccess { now } => {
                if self.session.deadline.is_some_and(|deadline| *now > deadline) {
                    self.resolve_all(MeasurementStatus::RejectedMaxDelayPassed);
                    context.push(MeasurementAction::RejectLate);
                    return self.finish(context, true);
                }
                context.push(MeasurementAction::SendStart {
                    channel: self.session.channel,
                    band: self.session.band,
                    duration: self.session.total_duration(),
                });
                self.arm_guard(context);
                self.enter(MeasurementState::WaitMeasureStart);
                Transition(State::wait_measure_start())
            }
            MeasurementEvent::DriverModeFailure => {
                self.resolve_all(MeasurementStatus::Failed);
                self.finish(context, false)
            }
            MeasurementEvent::StopRequest { send_null_data } => {
                self.session.send_null_data = *send_null_data;
                self.resolve_all(MeasurementStatus::Failed);
                self.finish(context, true)
            }
            MeasurementEvent::GuardExpired
            | MeasurementEvent::TypeExpired(_)
            | MeasurementEvent::ReadResult { .. } => Handled,
            MeasurementEvent::FirmwareReset => self.reset(context),
            _ => self.abandon(context, event),
        }
    }

    #[state]
    fn wait_measure_start(
        &mut self,
        context: &mut DispatchContext,
        event: &MeasurementEvent,
    ) -> Outcome<State> {
        match event {
            MeasurementEvent::StartSuccess => {
                self.disarm_guard(context);
                if self.session.stop_deferred {
                    self.resolve_all(MeasurementStatus::Failed);
                    return self.send_stop(context);
                }
                for (index, slot) in self.session.slots.iter_mut().enumerate() {
                    context.push(MeasurementAction::StartType {
                        index: index as u8,
                        request: slot.request,
                    });
                    slot.timer_running = true;
                }
                self.enter(MeasurementState::MeasureInProgress);
                Transition(State::measure_in_progress())
            }
            MeasurementEvent::StartFailure => {
                self.disarm_guard(context);
                self.resolve_all(MeasurementStatus::Failed);
                self.finish(context, true)
            }
            MeasurementEvent::StopRequest { send_null_data } => {
                debug!("measure: stop deferred until start acknowledged");
                self.session.send_null_data = *send_null_data;
                self.session.stop_deferred = true;
                Handled
            }
            MeasurementEvent::GuardExpired => self.fatal(context),
            MeasurementEvent::TypeExpired(_) | MeasurementEvent::ReadResult { .. } => Handled,
            MeasurementEvent::FirmwareReset => self.reset(context),
            _ => self.abandon(context, event),
        }
    }

    #[state]
    fn measure_in_progress(
        &mut self,
        context: &mut DispatchContext,
        event: &MeasurementEvent,
    ) -> Outcome<State> {
        match event {
            MeasurementEvent::TypeStartFailed(index) => {
                if let Some(slot) = self.session.slot_mut(*index) {
                    if !slot.finished {
                        context.push(MeasurementAction::DisarmTypeTimer(*index));
                        slot.resolve(MeasurementStatus::Failed, MeasurementValue::None);
                    }
                }
                self.check_complete(context);
                Handled
            }
            MeasurementEvent::TypeExpired(index) => {
                let Some(slot) = self.session.slot_mut(*index) else {
                    return Handled;
                };
                if !slot.timer_running {
                    debug!("measure: stale type timer index={}", index);
                    return Handled;
                }
                slot.timer_running = false;
                context.push(MeasurementAction::FinishType {
                    index: *index,
                    request: slot.request,
                });
                if slot.request.kind.needs_read() {
                    slot.read_pending = true;
                } else {
                    slot.resolve(MeasurementStatus::Success, MeasurementValue::Beacon);
                }
                self.check_complete(context);
                Handled
            }
            MeasurementEvent::ReadResult {
                index,
                status,
                value,
            } => {
                if let Some(slot) = self.session.slot_mut(*index) {
                    if slot.read_pending {
                        slot.resolve(*status, *value);
                        self.check_complete(context);
                    }
                }
                Handled
            }
            MeasurementEvent::AllTypesComplete => self.send_stop(context),
            MeasurementEvent::StopRequest { send_null_data } => {
                self.session.send_null_data = *send_null_data;
                for (index, slot) in self.session.slots.iter().enumerate() {
                    if slot.timer_running {
                        context.push(MeasurementAction::StopType {
                            index: index as u8,
                            request: slot.request,
                        });
                    }
                }
                self.resolve_all(MeasurementStatus::Failed);
                self.send_stop(context)
            }
            MeasurementEvent::GuardExpired => {
                debug!("measure: start/stop guard not armed");
                Handled
            }
            MeasurementEvent::FirmwareReset => self.reset(context),
            _ => self.abandon(context, event),
        }
    }

    #[state]
    fn wait_measure_stop(
        &mut self,
        context: &mut DispatchContext,
        event: &MeasurementEvent,
    ) -> Outcome<State> {
        match event {
            MeasurementEvent::StopComplete => {
                self.disarm_guard(context);
                self.finish(context, true)
            }
            MeasurementEvent::GuardExpired => self.fatal(context),
            MeasurementEvent::StopRequest { .. }
            | MeasurementEvent::AllTypesComplete
            | MeasurementEvent::TypeStartFailed(_)
            | MeasurementEvent::TypeExpired(_)
            | MeasurementEvent::ReadResult { .. } => Handled,
            MeasurementEvent::FirmwareReset => self.reset(context),
            _ => self.abandon(context, event),
        }
    }
}
