use core::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerMode {
    #[default]
    Active,
    PowerSave,
    KeepCurrent,
}

/// Outcome of a power-save transition as reported by the firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PsTransition {
    EnterSuccess,
    EnterFail,
    ExitSuccess,
    ExitFail,
}

impl PsTransition {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::EnterSuccess | Self::ExitSuccess)
    }

    /// Whether the chip sits in power save after this transition.
    pub const fn in_power_save(self) -> bool {
        matches!(self, Self::EnterSuccess | Self::ExitFail)
    }
}

/// Routing tag for power-save notices; replaces the opaque callback handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerClient {
    User,
    Scan,
    Measurement,
}

/// Internal clients allowed to reserve driver mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverClient {
    Scan,
    Measurement,
}

impl From<DriverClient> for PowerClient {
    fn from(client: DriverClient) -> Self {
        match client {
            DriverClient::Scan => Self::Scan,
            DriverClient::Measurement => Self::Measurement,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacFailure {
    PowerSaveFailure,
    NoScanComplete,
    MeasurementFailure,
}

impl fmt::Display for MacFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerSaveFailure => f.write_str("power save transition timed out"),
            Self::NoScanComplete => f.write_str("scan complete never arrived"),
            Self::MeasurementFailure => f.write_str("measurement start/stop timed out"),
        }
    }
}

/// Mailbox acknowledgement status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    Failed,
}

impl CommandStatus {
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Band {
    #[default]
    Ghz2_4,
    Ghz5,
}

/// Null-data frame transmit rate bitmask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateMask(pub u32);

impl RateMask {
    pub const BASIC_1M_2M: Self = Self(0x0003);
}
