//! Boundary with the firmware mailbox, the event channel and the timer facility.

use core::fmt;

use embassy_time::{Duration, Instant};

use crate::measurement::{
    BeaconScanMode, ChannelLoadCounters, NoiseHistogramCounters, NOISE_HISTOGRAM_RANGES,
};
use crate::scan::{ChannelList, ScanKind, ScanTag};
use crate::types::{Band, CommandStatus, PsTransition, RateMask};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerModeCommand {
    pub enter: bool,
    pub send_null_data: bool,
    pub null_data_rate: RateMask,
    pub hang_over_period: u8,
    pub null_packet_retries: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanCommand {
    pub tag: ScanTag,
    pub kind: ScanKind,
    pub band: Band,
    pub high_priority: bool,
    pub probe_requests: u8,
    pub channels: ChannelList,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FwCommand {
    SetPowerMode(PowerModeCommand),
    Scan(ScanCommand),
    SpsScan(ScanCommand),
    StopScan {
        tag: ScanTag,
    },
    StopSpsScan {
        tag: ScanTag,
    },
    MeasurementStart {
        channel: u8,
        band: Band,
        duration: Duration,
    },
    MeasurementStop,
    ChannelLoadStart {
        duration: Duration,
    },
    ChannelLoadStop,
    ReadChannelLoad,
    NoiseHistogramStart {
        duration: Duration,
        ranges: [i8; NOISE_HISTOGRAM_RANGES],
    },
    NoiseHistogramStop,
    ReadNoiseHistogram,
    ApDiscoveryStart {
        duration: Duration,
        scan_mode: BeaconScanMode,
    },
    ApDiscoveryStop,
}

impl FwCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::SetPowerMode(_) => CommandKind::SetPowerMode,
            Self::Scan(_) => CommandKind::Scan,
            Self::SpsScan(_) => CommandKind::SpsScan,
            Self::StopScan { .. } => CommandKind::StopScan,
            Self::StopSpsScan { .. } => CommandKind::StopSpsScan,
            Self::MeasurementStart { .. } => CommandKind::MeasurementStart,
            Self::MeasurementStop => CommandKind::MeasurementStop,
            Self::ChannelLoadStart { .. } => CommandKind::ChannelLoadStart,
            Self::ChannelLoadStop => CommandKind::ChannelLoadStop,
            Self::ReadChannelLoad => CommandKind::ReadChannelLoad,
            Self::NoiseHistogramStart { .. } => CommandKind::NoiseHistogramStart,
            Self::NoiseHistogramStop => CommandKind::NoiseHistogramStop,
            Self::ReadNoiseHistogram => CommandKind::ReadNoiseHistogram,
            Self::ApDiscoveryStart { .. } => CommandKind::ApDiscoveryStart,
            Self::ApDiscoveryStop => CommandKind::ApDiscoveryStop,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    SetPowerMode,
    Scan,
    SpsScan,
    StopScan,
    StopSpsScan,
    MeasurementStart,
    MeasurementStop,
    ChannelLoadStart,
    ChannelLoadStop,
    ReadChannelLoad,
    NoiseHistogramStart,
    NoiseHistogramStop,
    ReadNoiseHistogram,
    ApDiscoveryStart,
    ApDiscoveryStop,
}

/// Server that issued a command and receives its acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOwner {
    Power,
    Scan,
    Measurement,
}

impl CommandKind {
    pub const fn owner(self) -> CommandOwner {
        match self {
            Self::SetPowerMode => CommandOwner::Power,
            Self::Scan | Self::SpsScan | Self::StopScan | Self::StopSpsScan => CommandOwner::Scan,
            _ => CommandOwner::Measurement,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadPayload {
    ChannelLoad(ChannelLoadCounters),
    NoiseHistogram(NoiseHistogramCounters),
}

/// Asynchronous mailbox acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandResponse {
    pub kind: CommandKind,
    pub status: CommandStatus,
    pub payload: Option<ReadPayload>,
}

impl CommandResponse {
    pub const fn ok(kind: CommandKind) -> Self {
        Self {
            kind,
            status: CommandStatus::Ok,
            payload: None,
        }
    }

    pub const fn failed(kind: CommandKind) -> Self {
        Self {
            kind,
            status: CommandStatus::Failed,
            payload: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandError {
    MailboxFull,
    FirmwareDown,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MailboxFull => f.write_str("command mailbox full"),
            Self::FirmwareDown => f.write_str("firmware not running"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanCompleteEvent {
    pub result_count: u8,
    /// Bit per channel index of the scan request that was actually visited.
    pub scanned_channels: u16,
    pub tsf_error: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FwEvent {
    PowerSaveReport(PsTransition),
    ScanComplete(ScanCompleteEvent),
    SpsScanComplete(ScanCompleteEvent),
    MeasurementStarted,
    MeasurementComplete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FwEventId {
    PowerSaveReport,
    ScanComplete,
    SpsScanComplete,
    MeasurementStarted,
    MeasurementComplete,
}

impl FwEventId {
    pub const ALL: [Self; 5] = [
        Self::PowerSaveReport,
        Self::ScanComplete,
        Self::SpsScanComplete,
        Self::MeasurementStarted,
        Self::MeasurementComplete,
    ];
}

impl FwEvent {
    pub const fn id(&self) -> FwEventId {
        match self {
            Self::PowerSaveReport(_) => FwEventId::PowerSaveReport,
            Self::ScanComplete(_) => FwEventId::ScanComplete,
            Self::SpsScanComplete(_) => FwEventId::SpsScanComplete,
            Self::MeasurementStarted => FwEventId::MeasurementStarted,
            Self::MeasurementComplete => FwEventId::MeasurementComplete,
        }
    }
}

/// Statically allocated guard timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardTimer {
    PowerSave,
    Scan,
    MeasurementStartStop,
    MeasurementType(u8),
}

impl GuardTimer {
    pub const COUNT: usize = 3 + crate::measurement::MAX_MEASUREMENT_TYPES;

    pub const fn slot(self) -> usize {
        match self {
            Self::PowerSave => 0,
            Self::Scan => 1,
            Self::MeasurementStartStop => 2,
            Self::MeasurementType(index) => 3 + index as usize,
        }
    }

    pub const fn from_slot(slot: usize) -> Option<Self> {
        match slot {
            0 => Some(Self::PowerSave),
            1 => Some(Self::Scan),
            2 => Some(Self::MeasurementStartStop),
            n if n < Self::COUNT => Some(Self::MeasurementType((n - 3) as u8)),
            _ => None,
        }
    }
}

pub trait CommandChannel {
    fn send_command(&mut self, command: &FwCommand) -> Result<(), CommandError>;
}

pub trait EventChannel {
    fn unmask_event(&mut self, event: FwEventId);
}

pub trait GuardTimers {
    /// (Re)arms `timer`; expiry comes back through `MacServices::timer_expired`.
    fn start_timer(&mut self, timer: GuardTimer, interval: Duration);
    fn stop_timer(&mut self, timer: GuardTimer);
}

pub trait Clock {
    fn now(&self) -> Instant;
}

pub trait MacPlatform: CommandChannel + EventChannel + GuardTimers + Clock {}

impl<T> MacPlatform for T where T: CommandChannel + EventChannel + GuardTimers + Clock {}
