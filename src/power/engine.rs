use log::{debug, error, info, warn};
use statig::blocking::IntoStateMachineExt as _;

use super::machine::{DispatchContext, PowerAction, PowerSm, PowerSmEvent};
use super::types::{
    PowerError, PowerNotice, PowerReply, PowerRequest, PowerState, RequestClass, RequestPurpose,
    RequestState, UnexpectedPowerEvent,
};
use crate::config::MacServicesConfig;
use crate::platform::{CommandError, FwCommand, GuardTimer, MacPlatform, PowerModeCommand};
use crate::services::{MacNotification, Outbox};
use crate::telemetry;
use crate::types::{
    CommandStatus, DriverClient, MacFailure, PowerClient, PowerMode, PsTransition, RateMask,
};

/// Result of pushing one request record through the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Processed {
    Immediate(PsTransition),
    Deferred,
    Rejected(PsTransition),
}

/// Transition currently awaiting its firmware report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct InFlight {
    class: RequestClass,
    client: PowerClient,
    purpose: RequestPurpose,
    notify: bool,
}

pub(crate) struct PowerServer {
    machine: statig::blocking::StateMachine<PowerSm>,
    config: MacServicesConfig,
    user: PowerRequest,
    driver: PowerRequest,
    parked: Option<PowerRequest>,
    owner: Option<DriverClient>,
    current_mode: RequestClass,
    current: RequestClass,
    in_flight: Option<InFlight>,
    awaiting_response: Option<PowerClient>,
    rate_modulation: RateMask,
    last_error: Option<UnexpectedPowerEvent>,
}

impl PowerServer {
    pub(crate) fn new(config: MacServicesConfig) -> Self {
        Self {
            machine: PowerSm::new().state_machine(),
            config,
            user: PowerRequest::idle(PowerClient::User),
            driver: PowerRequest::idle(PowerClient::Scan),
            parked: None,
            owner: None,
            current_mode: RequestClass::User,
            current: RequestClass::User,
            in_flight: None,
            awaiting_response: None,
            rate_modulation: RateMask::BASIC_1M_2M,
            last_error: None,
        }
    }

    pub(crate) fn state(&self) -> PowerState {
        self.machine.inner().state_id
    }

    pub(crate) fn ps_status(&self) -> bool {
        matches!(self.state(), PowerState::PowerSave)
    }

    pub(crate) fn owner(&self) -> Option<DriverClient> {
        self.owner
    }

    pub(crate) fn rate_modulation(&self) -> RateMask {
        self.rate_modulation
    }

    pub(crate) fn set_rate_modulation(&mut self, rate: RateMask) {
        self.rate_modulation = rate;
    }

    pub(crate) fn last_error(&self) -> Option<UnexpectedPowerEvent> {
        self.last_error
    }

    pub(crate) fn set_ps_mode<P: MacPlatform>(
        &mut self,
        mode: PowerMode,
        send_null_data: bool,
        platform: &mut P,
        outbox: &mut Outbox,
    ) -> Result<PowerReply, PowerError> {
        self.user = PowerRequest::new(
            PowerClient::User,
            mode,
            send_null_data,
            RequestPurpose::Reserve,
        );
        if self.driver_active() {
            debug!("power: user request queued mode={:?} driver active", mode);
            self.user.state = RequestState::Pending;
            return Ok(PowerReply::Deferred);
        }

        self.current_mode = RequestClass::User;
        match self.process(RequestClass::User, platform) {
            Processed::Immediate(transition) => Ok(PowerReply::Immediate(transition)),
            Processed::Deferred => Ok(PowerReply::Deferred),
            Processed::Rejected(_) => {
                self.retry_pending(platform, outbox);
                Err(PowerError::CommandRejected)
            }
        }
    }

    pub(crate) fn reserve<P: MacPlatform>(
        &mut self,
        client: DriverClient,
        mode: PowerMode,
        send_null_data: bool,
        platform: &mut P,
        outbox: &mut Outbox,
    ) -> Result<PowerReply, PowerError> {
        let parked_by_client = self
            .parked
            .is_some_and(|parked| parked.client == PowerClient::from(client));
        if self.owner == Some(client) || parked_by_client {
            warn!("power: reserve rejected client={:?} already reserved", client);
            return Err(PowerError::AlreadyReserved);
        }

        let mut request =
            PowerRequest::new(client.into(), mode, send_null_data, RequestPurpose::Reserve);
        if self.owner.is_some() || self.driver.is_busy() {
            if self.parked.is_some() {
                return Err(PowerError::Busy);
            }
            debug!("power: reserve parked client={:?} owner={:?}", client, self.owner);
            request.state = RequestState::Pending;
            self.parked = Some(request);
            return Ok(PowerReply::Deferred);
        }

        match self.grant(client, request, platform) {
            Processed::Immediate(transition) => Ok(PowerReply::Immediate(transition)),
            Processed::Deferred => Ok(PowerReply::Deferred),
            Processed::Rejected(_) => {
                self.retry_pending(platform, outbox);
                Err(PowerError::CommandRejected)
            }
        }
    }

    pub(crate) fn release<P: MacPlatform>(
        &mut self,
        client: DriverClient,
        send_null_data: bool,
        platform: &mut P,
        outbox: &mut Outbox,
    ) -> Result<PowerReply, PowerError> {
        if self.owner != Some(client) {
            if self
                .parked
                .is_some_and(|parked| parked.client == PowerClient::from(client))
            {
                debug!("power: parked reservation withdrawn client={:?}", client);
                self.parked = None;
                return Ok(PowerReply::Immediate(self.settled_transition()));
            }
            warn!("power: release rejected client={:?} not owner", client);
            return Err(PowerError::NotReserved);
        }

        match self.driver.state {
            RequestState::New | RequestState::Pending => {
                debug!("power: release of unsent reservation client={:?}", client);
                self.driver.state = RequestState::Handled;
                self.drop_reservation();
                let reply = PowerReply::Immediate(self.settled_transition());
                self.retry_pending(platform, outbox);
                Ok(reply)
            }
            RequestState::Running => {
                // The reservation transition is still in flight; only the release is reported.
                if let Some(flight) = self.in_flight.as_mut() {
                    if flight.class == RequestClass::Driver {
                        flight.notify = false;
                    }
                }
                self.drop_reservation();
                self.driver = self.release_request(client, send_null_data);
                self.driver.state = RequestState::Pending;
                Ok(PowerReply::Deferred)
            }
            RequestState::Handled => {
                self.owner = None;
                let reply_transition = self.settled_transition();
                if let Some(next) = self.parked.take() {
                    self.hand_over(next, platform, outbox);
                    return Ok(PowerReply::Immediate(reply_transition));
                }

                self.current_mode = RequestClass::User;
                self.driver = self.release_request(client, send_null_data);
                match self.process(RequestClass::Driver, platform) {
                    Processed::Immediate(transition) => {
                        self.retry_pending(platform, outbox);
                        Ok(PowerReply::Immediate(transition))
                    }
                    Processed::Deferred => Ok(PowerReply::Deferred),
                    Processed::Rejected(_) => {
                        self.retry_pending(platform, outbox);
                        Err(PowerError::CommandRejected)
                    }
                }
            }
        }
    }

    pub(crate) fn handle_report<P: MacPlatform>(
        &mut self,
        report: PsTransition,
        platform: &mut P,
        outbox: &mut Outbox,
    ) {
        debug!("power: firmware report {:?} state={:?}", report, self.state());
        let event = if report.is_success() {
            PowerSmEvent::Success
        } else {
            PowerSmEvent::Fail
        };
        self.resolve(event, platform, outbox);
    }

    pub(crate) fn command_response<P: MacPlatform>(
        &mut self,
        status: CommandStatus,
        platform: &mut P,
        outbox: &mut Outbox,
    ) {
        match self.awaiting_response.take() {
            Some(PowerClient::User) => {
                outbox.notify(MacNotification::PowerCommandAccepted(status));
            }
            Some(client) => {
                debug!("power: command response client={:?} status={:?}", client, status);
            }
            None => debug!("power: unsolicited command response status={:?}", status),
        }

        if !status.is_ok() && self.state().is_pending() {
            warn!("power: mode command nacked state={:?}", self.state());
            self.resolve(PowerSmEvent::Fail, platform, outbox);
        }
    }

    pub(crate) fn guard_expired<P: MacPlatform>(
        &mut self,
        was_reset: bool,
        platform: &mut P,
        outbox: &mut Outbox,
    ) {
        if was_reset {
            debug!("power: stale guard expiry ignored");
            return;
        }
        if !self.state().is_pending() {
            debug!("power: guard expiry with no transition state={:?}", self.state());
            return;
        }

        error!("power: transition timed out state={:?}", self.state());
        platform.stop_timer(GuardTimer::PowerSave);
        telemetry::record_power_escalation();
        outbox.escalate(MacFailure::PowerSaveFailure);
    }

    pub(crate) fn notify_reset<P: MacPlatform>(&mut self, platform: &mut P) {
        if self.state().is_pending() {
            platform.stop_timer(GuardTimer::PowerSave);
        }
        self.machine = PowerSm::new().state_machine();
        self.user.state = RequestState::Handled;
        self.driver.state = RequestState::Handled;
        self.parked = None;
        self.owner = None;
        self.in_flight = None;
        self.awaiting_response = None;
        self.current_mode = RequestClass::User;
        self.current = RequestClass::User;
    }

    fn resolve<P: MacPlatform>(
        &mut self,
        event: PowerSmEvent,
        platform: &mut P,
        outbox: &mut Outbox,
    ) {
        let Some(transition) = self.dispatch(event, platform) else {
            return;
        };
        telemetry::record_power_transition(transition.is_success());

        if let Some(flight) = self.in_flight.take() {
            let record = self.record_mut(flight.class);
            if record.state == RequestState::Running {
                record.state = RequestState::Handled;
            }
            if flight.notify {
                if flight.class == RequestClass::Driver
                    && flight.purpose == RequestPurpose::Reserve
                    && !transition.is_success()
                {
                    warn!("power: reservation failed client={:?} {:?}", flight.client, transition);
                    self.drop_reservation();
                }
                outbox.power_notice(PowerNotice {
                    client: flight.client,
                    transition,
                });
            }
        }

        self.retry_pending(platform, outbox);
    }

    fn driver_active(&self) -> bool {
        self.current_mode == RequestClass::Driver || self.driver.is_busy() || self.parked.is_some()
    }

    fn record_mut(&mut self, class: RequestClass) -> &mut PowerRequest {
        match class {
            RequestClass::User => &mut self.user,
            RequestClass::Driver => &mut self.driver,
        }
    }

    fn settled_transition(&self) -> PsTransition {
        if self.ps_status() {
            PsTransition::EnterSuccess
        } else {
            PsTransition::ExitSuccess
        }
    }

    fn release_request(&self, client: DriverClient, send_null_data: bool) -> PowerRequest {
        PowerRequest::new(client.into(), self.user.mode, send_null_data, RequestPurpose::Release)
    }

    fn drop_reservation(&mut self) {
        self.owner = None;
        self.current_mode = RequestClass::User;
    }

    fn grant<P: MacPlatform>(
        &mut self,
        client: DriverClient,
        request: PowerRequest,
        platform: &mut P,
    ) -> Processed {
        info!("power: driver mode granted client={:?} mode={:?}", client, request.mode);
        self.owner = Some(client);
        self.current_mode = RequestClass::Driver;
        self.driver = request;
        self.driver.state = RequestState::New;
        let processed = self.process(RequestClass::Driver, platform);
        if let Processed::Rejected(_) = processed {
            self.drop_reservation();
        }
        processed
    }

    fn hand_over<P: MacPlatform>(
        &mut self,
        next: PowerRequest,
        platform: &mut P,
        outbox: &mut Outbox,
    ) {
        let Some(client) = Self::driver_client(next.client) else {
            return;
        };
        debug!("power: ownership handed to client={:?}", client);
        let processed = self.grant(client, next, platform);
        self.settle(next.client, processed, outbox);
        if !matches!(processed, Processed::Deferred) {
            self.retry_pending(platform, outbox);
        }
    }

    fn driver_client(client: PowerClient) -> Option<DriverClient> {
        match client {
            PowerClient::Scan => Some(DriverClient::Scan),
            PowerClient::Measurement => Some(DriverClient::Measurement),
            PowerClient::User => None,
        }
    }

    /// Runs one record through the machine unless a transition is already in flight.
    fn process<P: MacPlatform>(&mut self, class: RequestClass, platform: &mut P) -> Processed {
        if self.state().is_pending() {
            debug!("power: request queued class={:?} transition in flight", class);
            self.record_mut(class).state = RequestState::Pending;
            return Processed::Deferred;
        }

        let request = *self.record_mut(class);
        self.current = class;
        let event = match request.mode {
            PowerMode::KeepCurrent => {
                self.record_mut(class).state = RequestState::Handled;
                return Processed::Immediate(self.settled_transition());
            }
            PowerMode::Active => PowerSmEvent::RequestActive,
            PowerMode::PowerSave => PowerSmEvent::RequestPowerSave,
        };

        self.record_mut(class).state = RequestState::Running;
        self.in_flight = Some(InFlight {
            class,
            client: request.client,
            purpose: request.purpose,
            notify: true,
        });

        match self.dispatch(event, platform) {
            Some(transition) => {
                self.in_flight = None;
                self.record_mut(class).state = RequestState::Handled;
                if transition.is_success() {
                    Processed::Immediate(transition)
                } else {
                    telemetry::record_power_transition(false);
                    Processed::Rejected(transition)
                }
            }
            None if self.state().is_pending() => Processed::Deferred,
            None => {
                self.in_flight = None;
                self.record_mut(class).state = RequestState::Handled;
                Processed::Immediate(self.settled_transition())
            }
        }
    }

    /// Re-checks queued records after a transition settled; driver class first.
    fn retry_pending<P: MacPlatform>(&mut self, platform: &mut P, outbox: &mut Outbox) {
        loop {
            if self.state().is_pending() {
                return;
            }

            if self.driver.state == RequestState::Pending {
                let client = self.driver.client;
                let purpose = self.driver.purpose;
                self.current_mode = match purpose {
                    RequestPurpose::Reserve => RequestClass::Driver,
                    RequestPurpose::Release => RequestClass::User,
                };
                let processed = self.process(RequestClass::Driver, platform);
                if purpose == RequestPurpose::Reserve {
                    if let Processed::Rejected(_) = processed {
                        self.drop_reservation();
                    }
                }
                self.settle(client, processed, outbox);
                continue;
            }

            if self.owner.is_none() && !self.driver.is_busy() {
                if let Some(next) = self.parked.take() {
                    let Some(client) = Self::driver_client(next.client) else {
                        continue;
                    };
                    let processed = self.grant(client, next, platform);
                    self.settle(next.client, processed, outbox);
                    continue;
                }
            }

            if self.user.state == RequestState::Pending && !self.driver_active() {
                self.current_mode = RequestClass::User;
                let processed = self.process(RequestClass::User, platform);
                self.settle(PowerClient::User, processed, outbox);
                continue;
            }

            return;
        }
    }

    fn settle(&mut self, client: PowerClient, processed: Processed, outbox: &mut Outbox) {
        match processed {
            Processed::Deferred => {}
            Processed::Immediate(transition) | Processed::Rejected(transition) => {
                outbox.power_notice(PowerNotice { client, transition });
            }
        }
    }

    fn dispatch<P: MacPlatform>(
        &mut self,
        event: PowerSmEvent,
        platform: &mut P,
    ) -> Option<PsTransition> {
        let mut next = Some(event);
        let mut completed = None;
        while let Some(event) = next.take() {
            let mut context = DispatchContext::default();
            self.machine.handle_with_context(&event, &mut context);
            for action in context.actions {
                match action {
                    PowerAction::SendModeCommand { enter } => {
                        if let Err(err) = self.send_mode_command(enter, platform) {
                            warn!("power: mode command rejected enter={} err={}", enter, err);
                            next = Some(PowerSmEvent::Fail);
                        }
                    }
                    PowerAction::ArmGuard => {
                        platform.start_timer(GuardTimer::PowerSave, self.config.power_save_guard);
                    }
                    PowerAction::DisarmGuard => platform.stop_timer(GuardTimer::PowerSave),
                    PowerAction::Completed(transition) => completed = Some(transition),
                    PowerAction::Unexpected(event) => {
                        let state = self.state();
                        warn!("power: unexpected event={} state={:?}", event.name(), state);
                        telemetry::record_unexpected_event();
                        self.last_error = Some(UnexpectedPowerEvent {
                            state,
                            event: event.name(),
                        });
                    }
                }
            }
        }
        completed
    }

    fn send_mode_command<P: MacPlatform>(
        &mut self,
        enter: bool,
        platform: &mut P,
    ) -> Result<(), CommandError> {
        let request = match self.current {
            RequestClass::User => self.user,
            RequestClass::Driver => self.driver,
        };
        let command = FwCommand::SetPowerMode(PowerModeCommand {
            enter,
            send_null_data: !enter && request.send_null_data,
            null_data_rate: self.rate_modulation,
            hang_over_period: self.config.hang_over_period,
            null_packet_retries: self.config.null_packet_retries,
        });
        platform.send_command(&command)?;
        self.awaiting_response = Some(request.client);
        Ok(())
    }
}
