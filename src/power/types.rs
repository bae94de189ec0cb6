use core::fmt;

use crate::types::{PowerClient, PowerMode, PsTransition};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerState {
    #[default]
    Active,
    PendingPowerSave,
    PowerSave,
    PendingActive,
    ErrorActive,
}

impl PowerState {
    pub const ALL: [Self; 5] = [
        Self::Active,
        Self::PendingPowerSave,
        Self::PowerSave,
        Self::PendingActive,
        Self::ErrorActive,
    ];

    pub const fn is_pending(self) -> bool {
        matches!(self, Self::PendingPowerSave | Self::PendingActive)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum RequestState {
    New,
    Pending,
    Running,
    #[default]
    Handled,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum RequestClass {
    #[default]
    User,
    Driver,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum RequestPurpose {
    #[default]
    Reserve,
    Release,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PowerRequest {
    pub(crate) mode: PowerMode,
    pub(crate) send_null_data: bool,
    pub(crate) client: PowerClient,
    pub(crate) purpose: RequestPurpose,
    pub(crate) state: RequestState,
}

impl PowerRequest {
    pub(crate) const fn new(
        client: PowerClient,
        mode: PowerMode,
        send_null_data: bool,
        purpose: RequestPurpose,
    ) -> Self {
        Self {
            mode,
            send_null_data,
            client,
            purpose,
            state: RequestState::New,
        }
    }

    pub(crate) const fn idle(client: PowerClient) -> Self {
        Self {
            mode: PowerMode::Active,
            send_null_data: false,
            client,
            purpose: RequestPurpose::Reserve,
            state: RequestState::Handled,
        }
    }

    pub(crate) const fn is_busy(&self) -> bool {
        !matches!(self.state, RequestState::Handled)
    }
}

/// Synchronous answer of a power-save request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerReply {
    /// Satisfied now; no notice follows.
    Immediate(PsTransition),
    /// Exactly one notice follows.
    Deferred,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerError {
    AlreadyReserved,
    Busy,
    NotReserved,
    CommandRejected,
}

impl fmt::Display for PowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyReserved => f.write_str("driver mode already reserved by this client"),
            Self::Busy => f.write_str("driver mode reservation queue full"),
            Self::NotReserved => f.write_str("client holds no driver mode reservation"),
            Self::CommandRejected => f.write_str("power mode command rejected"),
        }
    }
}

/// Deferred completion of a power-save request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerNotice {
    pub client: PowerClient,
    pub transition: PsTransition,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnexpectedPowerEvent {
    pub state: PowerState,
    pub event: &'static str,
}
