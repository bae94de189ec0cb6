use embassy_time::Duration;
use heapless::Deque;
use log::{debug, error, info, warn};
use statig::blocking::IntoStateMachineExt as _;

use super::machine::{DispatchContext, MeasurementAction, MeasurementEvent, MeasurementSm};
use super::results::{cca_busy_fraction, rpi_densities};
use super::types::{
    MeasurementError, MeasurementKind, MeasurementRequest, MeasurementState, MeasurementStatus,
    MeasurementTypeRequest, MeasurementValue, UnexpectedMeasurementEvent,
};
use crate::config::MacServicesConfig;
use crate::platform::{
    CommandKind, CommandResponse, FwCommand, GuardTimer, MacPlatform, ReadPayload,
};
use crate::power::{PowerError, PowerReply};
use crate::services::{Env, MacNotification};
use crate::telemetry;
use crate::types::{CommandStatus, DriverClient, MacFailure, PsTransition};

const EVENT_QUEUE: usize = 8;

pub(crate) struct MeasurementServer {
    machine: statig::blocking::StateMachine<MeasurementSm>,
    config: MacServicesConfig,
    last_error: Option<UnexpectedMeasurementEvent>,
}

impl MeasurementServer {
    pub(crate) fn new(config: MacServicesConfig) -> Self {
        Self {
            machine: MeasurementSm::new().state_machine(),
            config,
            last_error: None,
        }
    }

    pub(crate) fn state(&self) -> MeasurementState {
        self.machine.inner().state_id
    }

    pub(crate) fn last_error(&self) -> Option<UnexpectedMeasurementEvent> {
        self.last_error
    }

    /// True once no type is measuring or waiting for its read-back.
    pub(crate) fn is_measurement_complete(&self) -> bool {
        match self.state() {
            MeasurementState::Idle | MeasurementState::WaitMeasureStop => true,
            MeasurementState::MeasureInProgress => self.machine.inner().session.all_types_done(),
            MeasurementState::WaitDriverMode | MeasurementState::WaitMeasureStart => false,
        }
    }

    pub(crate) fn start_measurement<P: MacPlatform>(
        &mut self,
        request: MeasurementRequest,
        max_delay: Duration,
        env: &mut Env<'_, P>,
    ) -> Result<(), MeasurementError> {
        if self.state() != MeasurementState::Idle {
            warn!("measure: start rejected state={:?}", self.state());
            return Err(MeasurementError::Busy);
        }
        validate(&request)?;

        info!(
            "measure: start channel={} types={} duration_ms={}",
            request.channel,
            request.types.len(),
            request.total_duration().as_millis()
        );
        telemetry::record_measurement_started();
        // An unrepresentable deadline means the caller set no limit.
        let deadline = request.received_at.checked_add(max_delay);
        self.run(MeasurementEvent::Start { request, deadline }, env);
        Ok(())
    }

    pub(crate) fn stop_measurement<P: MacPlatform>(
        &mut self,
        send_null_data: bool,
        env: &mut Env<'_, P>,
    ) {
        debug!("measure: stop requested state={:?}", self.state());
        self.run(MeasurementEvent::StopRequest { send_null_data }, env);
    }

    pub(crate) fn driver_mode_complete<P: MacPlatform>(
        &mut self,
        transition: PsTransition,
        env: &mut Env<'_, P>,
    ) {
        let event = self.driver_mode_event(transition.is_success(), env);
        self.run(event, env);
    }

    pub(crate) fn start_complete<P: MacPlatform>(&mut self, env: &mut Env<'_, P>) {
        self.run(MeasurementEvent::StartSuccess, env);
    }

    pub(crate) fn stop_complete<P: MacPlatform>(&mut self, env: &mut Env<'_, P>) {
        self.run(MeasurementEvent::StopComplete, env);
    }

    pub(crate) fn command_response<P: MacPlatform>(
        &mut self,
        response: CommandResponse,
        env: &mut Env<'_, P>,
    ) {
        env.outbox
            .notify(MacNotification::MeasurementCommandAccepted(response.status));

        let failed = !response.status.is_ok();
        let event = match response.kind {
            CommandKind::MeasurementStart if failed => Some(MeasurementEvent::StartFailure),
            CommandKind::MeasurementStop if failed => Some(MeasurementEvent::StopComplete),
            CommandKind::ChannelLoadStart
            | CommandKind::NoiseHistogramStart
            | CommandKind::ApDiscoveryStart
                if failed =>
            {
                start_kind(response.kind)
                    .and_then(|kind| self.index_of(kind))
                    .map(MeasurementEvent::TypeStartFailed)
            }
            CommandKind::ReadChannelLoad => {
                self.read_result(MeasurementKind::ChannelLoad, response)
            }
            CommandKind::ReadNoiseHistogram => {
                self.read_result(MeasurementKind::NoiseHistogram, response)
            }
            kind => {
                debug!("measure: ack kind={:?} status={:?}", kind, response.status);
                None
            }
        };
        if let Some(event) = event {
            self.run(event, env);
        }
    }

    pub(crate) fn guard_expired<P: MacPlatform>(&mut self, was_reset: bool, env: &mut Env<'_, P>) {
        if was_reset {
            debug!("measure: stale guard expiry ignored");
            return;
        }
        self.run(MeasurementEvent::GuardExpired, env);
    }

    pub(crate) fn type_expired<P: MacPlatform>(
        &mut self,
        index: u8,
        was_reset: bool,
        env: &mut Env<'_, P>,
    ) {
        if was_reset {
            debug!("measure: stale type timer index={} ignored", index);
            return;
        }
        self.run(MeasurementEvent::TypeExpired(index), env);
    }

    pub(crate) fn notify_reset<P: MacPlatform>(&mut self, env: &mut Env<'_, P>) {
        self.run(MeasurementEvent::FirmwareReset, env);
    }

    fn run<P: MacPlatform>(&mut self, event: MeasurementEvent, env: &mut Env<'_, P>) {
        let mut queue: Deque<MeasurementEvent, EVENT_QUEUE> = Deque::new();
        let _ = queue.push_back(event);
        while let Some(event) = queue.pop_front() {
            let mut context = DispatchContext::default();
            self.machine.handle_with_context(&event, &mut context);
            for action in context.actions {
                if let Some(next) = self.execute(action, env) {
                    if let Err(dropped) = queue.push_back(next) {
                        warn!("measure: event queue full dropped={}", dropped.name());
                    }
                }
            }
        }
    }

    fn execute<P: MacPlatform>(
        &mut self,
        action: MeasurementAction,
        env: &mut Env<'_, P>,
    ) -> Option<MeasurementEvent> {
        match action {
            MeasurementAction::Reserve(mode) => {
                let reply = env.power.reserve(
                    DriverClient::Measurement,
                    mode,
                    false,
                    &mut *env.platform,
                    &mut *env.outbox,
                );
                self.power_event(reply, env)
            }
            MeasurementAction::Release { send_null_data } => {
                let reply = env.power.release(
                    DriverClient::Measurement,
                    send_null_data,
                    &mut *env.platform,
                    &mut *env.outbox,
                );
                self.power_event(reply, env)
            }
            MeasurementAction::SendStart {
                channel,
                band,
                duration,
            } => {
                let command = FwCommand::MeasurementStart {
                    channel,
                    band,
                    duration,
                };
                match env.platform.send_command(&command) {
                    Ok(()) => None,
                    Err(err) => {
                        warn!("measure: start command rejected err={}", err);
                        Some(MeasurementEvent::StartFailure)
                    }
                }
            }
            MeasurementAction::SendStop => {
                match env.platform.send_command(&FwCommand::MeasurementStop) {
                    Ok(()) => None,
                    Err(err) => {
                        warn!("measure: stop command rejected err={}", err);
                        Some(MeasurementEvent::StopComplete)
                    }
                }
            }
            MeasurementAction::StartType { index, request } => {
                env.platform
                    .start_timer(GuardTimer::MeasurementType(index), request.duration);
                let command = self.type_start_command(request);
                match env.platform.send_command(&command) {
                    Ok(()) => None,
                    Err(err) => {
                        warn!("measure: {:?} start rejected err={}", request.kind, err);
                        Some(MeasurementEvent::TypeStartFailed(index))
                    }
                }
            }
            MeasurementAction::FinishType { index, request } => {
                if let Err(err) = env.platform.send_command(&type_stop_command(request.kind)) {
                    warn!("measure: {:?} stop rejected err={}", request.kind, err);
                }
                let read = match request.kind {
                    MeasurementKind::ChannelLoad => FwCommand::ReadChannelLoad,
                    MeasurementKind::NoiseHistogram => FwCommand::ReadNoiseHistogram,
                    MeasurementKind::Beacon => return None,
                };
                match env.platform.send_command(&read) {
                    Ok(()) => None,
                    Err(err) => {
                        warn!("measure: {:?} read rejected err={}", request.kind, err);
                        Some(MeasurementEvent::ReadResult {
                            index,
                            status: MeasurementStatus::Failed,
                            value: MeasurementValue::None,
                        })
                    }
                }
            }
            MeasurementAction::StopType { index, request } => {
                env.platform.stop_timer(GuardTimer::MeasurementType(index));
                if let Err(err) = env.platform.send_command(&type_stop_command(request.kind)) {
                    warn!("measure: {:?} stop rejected err={}", request.kind, err);
                }
                None
            }
            MeasurementAction::DisarmTypeTimer(index) => {
                env.platform.stop_timer(GuardTimer::MeasurementType(index));
                None
            }
            MeasurementAction::ArmGuard => {
                env.platform.start_timer(
                    GuardTimer::MeasurementStartStop,
                    self.config.measurement_start_stop_guard,
                );
                None
            }
            MeasurementAction::DisarmGuard => {
                env.platform.stop_timer(GuardTimer::MeasurementStartStop);
                None
            }
            MeasurementAction::Notify(reply) => {
                info!(
                    "measure: complete channel={} types={}",
                    reply.channel,
                    reply.types.len()
                );
                telemetry::record_measurement_completed();
                env.outbox.notify(MacNotification::MeasurementComplete(reply));
                None
            }
            MeasurementAction::RejectLate => {
                warn!("measure: request older than allowed delay, rejected");
                telemetry::record_measurement_rejected_delay();
                None
            }
            MeasurementAction::Escalate => {
                error!("measure: start/stop guard expired");
                telemetry::record_measurement_escalation();
                env.outbox.escalate(MacFailure::MeasurementFailure);
                None
            }
            MeasurementAction::Raise(event) => Some(event),
            MeasurementAction::Unexpected { state, event } => {
                warn!("measure: unexpected event={} state={:?}", event, state);
                telemetry::record_unexpected_event();
                self.last_error = Some(UnexpectedMeasurementEvent { state, event });
                None
            }
        }
    }

    fn power_event<P: MacPlatform>(
        &self,
        reply: Result<PowerReply, PowerError>,
        env: &mut Env<'_, P>,
    ) -> Option<MeasurementEvent> {
        match reply {
            Ok(PowerReply::Immediate(transition)) => {
                Some(self.driver_mode_event(transition.is_success(), env))
            }
            Ok(PowerReply::Deferred) => None,
            Err(err) => {
                warn!("measure: driver mode request failed err={}", err);
                Some(MeasurementEvent::DriverModeFailure)
            }
        }
    }

    fn driver_mode_event<P: MacPlatform>(
        &self,
        success: bool,
        env: &Env<'_, P>,
    ) -> MeasurementEvent {
        if success {
            MeasurementEvent::DriverModeSuccess {
                now: env.platform.now(),
            }
        } else {
            MeasurementEvent::DriverModeFailure
        }
    }

    fn type_start_command(&self, request: MeasurementTypeRequest) -> FwCommand {
        match request.kind {
            MeasurementKind::ChannelLoad => FwCommand::ChannelLoadStart {
                duration: request.duration,
            },
            MeasurementKind::NoiseHistogram => FwCommand::NoiseHistogramStart {
                duration: request.duration,
                ranges: self.config.noise_histogram_ranges,
            },
            MeasurementKind::Beacon => FwCommand::ApDiscoveryStart {
                duration: request.duration,
                scan_mode: request.scan_mode,
            },
        }
    }

    fn index_of(&self, kind: MeasurementKind) -> Option<u8> {
        self.machine
            .inner()
            .session
            .slots
            .iter()
            .position(|slot| slot.request.kind == kind)
            .map(|index| index as u8)
    }

    fn read_result(
        &self,
        kind: MeasurementKind,
        response: CommandResponse,
    ) -> Option<MeasurementEvent> {
        let index = self.index_of(kind)?;
        let requested = self.machine.inner().session.slot(index)?.request.duration;
        let (status, value) = match (response.status, response.payload) {
            (CommandStatus::Ok, Some(ReadPayload::ChannelLoad(counters))) => (
                MeasurementStatus::Success,
                MeasurementValue::ChannelLoad(cca_busy_fraction(counters, requested)),
            ),
            (CommandStatus::Ok, Some(ReadPayload::NoiseHistogram(counters))) => {
                match rpi_densities(counters, self.config.noise_histogram_min_samples) {
                    Some(densities) => (
                        MeasurementStatus::Success,
                        MeasurementValue::NoiseHistogram(densities),
                    ),
                    None => (MeasurementStatus::InsufficientSamples, MeasurementValue::None),
                }
            }
            _ => (MeasurementStatus::Failed, MeasurementValue::None),
        };
        Some(MeasurementEvent::ReadResult {
            index,
            status,
            value,
        })
    }
}

fn validate(request: &MeasurementRequest) -> Result<(), MeasurementError> {
    if request.types.is_empty() {
        return Err(MeasurementError::InvalidRequest);
    }
    for (position, entry) in request.types.iter().enumerate() {
        let duplicate = request.types[..position]
            .iter()
            .any(|earlier| earlier.kind == entry.kind);
        if entry.duration.as_ticks() == 0 || duplicate {
            return Err(MeasurementError::InvalidRequest);
        }
    }
    Ok(())
}

fn start_kind(kind: CommandKind) -> Option<MeasurementKind> {
    match kind {
        CommandKind::ChannelLoadStart => Some(MeasurementKind::ChannelLoad),
        CommandKind::NoiseHistogramStart => Some(MeasurementKind::NoiseHistogram),
        CommandKind::ApDiscoveryStart => Some(MeasurementKind::Beacon),
        _ => None,
    }
}

fn type_stop_command(kind: MeasurementKind) -> FwCommand {
    match kind {
        MeasurementKind::ChannelLoad => FwCommand::ChannelLoadStop,
        MeasurementKind::NoiseHistogram => FwCommand::NoiseHistogramStop,
        MeasurementKind::Beacon => FwCommand::ApDiscoveryStop,
    }
}
