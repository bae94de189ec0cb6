use heapless::Vec;
use log::{debug, warn};
use statig::prelude::*;

use super::types::PowerState;
use crate::types::PsTransition;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum PowerSmEvent {
    RequestActive,
    RequestPowerSave,
    Success,
    Fail,
}

impl PowerSmEvent {
    pub(super) const ALL: [Self; 4] = [
        Self::RequestActive,
        Self::RequestPowerSave,
        Self::Success,
        Self::Fail,
    ];

    pub(super) const fn name(self) -> &'static str {
        match self {
            Self::RequestActive => "RequestActive",
            Self::RequestPowerSave => "RequestPowerSave",
            Self::Success => "Success",
            Self::Fail => "Fail",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum PowerAction {
    SendModeCommand { enter: bool },
    ArmGuard,
    DisarmGuard,
    Completed(PsTransition),
    Unexpected(PowerSmEvent),
}

pub(super) type PowerActions = Vec<PowerAction, 4>;

#[derive(Default)]
pub(super) struct DispatchContext {
    pub(super) actions: PowerActions,
}

impl DispatchContext {
    pub(super) fn push(&mut self, action: PowerAction) {
        if let Err(dropped) = self.actions.push(action) {
            warn!("power: action buffer full dropped={:?}", dropped);
        }
    }
}

pub(super) struct PowerSm {
    pub(super) state_id: PowerState,
}

impl PowerSm {
    pub(super) fn new() -> Self {
        Self {
            state_id: PowerState::Active,
        }
    }

    fn enter(&mut self, state: PowerState) {
        debug!("power: transition from={:?} to={:?}", self.state_id, state);
        self.state_id = state;
    }

    fn request_transition(&mut self, context: &mut DispatchContext, enter: bool) {
        context.push(PowerAction::SendModeCommand { enter });
        context.push(PowerAction::ArmGuard);
        self.enter(if enter {
            PowerState::PendingPowerSave
        } else {
            PowerState::PendingActive
        });
    }

    fn settle(&mut self, context: &mut DispatchContext, state: PowerState, status: PsTransition) {
        context.push(PowerAction::DisarmGuard);
        context.push(PowerAction::Completed(status));
        self.enter(state);
    }
}

#[state_machine(initial = "State::active()")]
impl PowerSm {
    #[state(superstate = "settled")]
    fn active(&mut self, context: &mut DispatchContext, event: &PowerSmEvent) -> Outcome<State> {
        match event {
            PowerSmEvent::RequestActive => {
                context.push(PowerAction::Completed(PsTransition::ExitSuccess));
                Handled
            }
            PowerSmEvent::RequestPowerSave => {
                self.request_transition(context, true);
                Transition(State::pending_power_save())
            }
            _ => Super,
        }
    }

    #[state(superstate = "settled")]
    fn power_save(
        &mut self,
        context: &mut DispatchContext,
        event: &PowerSmEvent,
    ) -> Outcome<State> {
        match event {
            PowerSmEvent::RequestActive => {
                self.request_transition(context, false);
                Transition(State::pending_active())
            }
            PowerSmEvent::RequestPowerSave => {
                context.push(PowerAction::Completed(PsTransition::EnterSuccess));
                Handled
            }
            _ => Super,
        }
    }

    // Exit from power save failed; the chip may still be dozing.
    #[state(superstate = "settled")]
    fn error_active(
        &mut self,
        context: &mut DispatchContext,
        event: &PowerSmEvent,
    ) -> Outcome<State> {
        match event {
            PowerSmEvent::RequestActive => {
                self.request_transition(context, false);
                Transition(State::pending_active())
            }
            PowerSmEvent::RequestPowerSave => {
                self.request_transition(context, true);
                Transition(State::pending_power_save())
            }
            _ => Super,
        }
    }

    #[state(superstate = "pending")]
    fn pending_power_save(
        &mut self,
        context: &mut DispatchContext,
        event: &PowerSmEvent,
    ) -> Outcome<State> {
        match event {
            PowerSmEvent::Success => {
                self.settle(context, PowerState::PowerSave, PsTransition::EnterSuccess);
                Transition(State::power_save())
            }
            PowerSmEvent::Fail => {
                self.settle(context, PowerState::Active, PsTransition::EnterFail);
                Transition(State::active())
            }
            _ => Super,
        }
    }

    #[state(superstate = "pending")]
    fn pending_active(
        &mut self,
        context: &mut DispatchContext,
        event: &PowerSmEvent,
    ) -> Outcome<State> {
        match event {
            PowerSmEvent::Success => {
                self.settle(context, PowerState::Active, PsTransition::ExitSuccess);
                Transition(State::active())
            }
            PowerSmEvent::Fail => {
                self.settle(context, PowerState::ErrorActive, PsTransition::ExitFail);
                Transition(State::error_active())
            }
            _ => Super,
        }
    }

    // Firmware reports with no transition in flight.
    #[superstate]
    fn settled(&mut self, context: &mut DispatchContext, event: &PowerSmEvent) -> Outcome<State> {
        context.push(PowerAction::Unexpected(*event));
        Handled
    }

    // Requests are queued by the server before they reach a pending state.
    #[superstate]
    fn pending(&mut self, context: &mut DispatchContext, event: &PowerSmEvent) -> Outcome<State> {
        context.push(PowerAction::Unexpected(*event));
        Handled
    }
}
