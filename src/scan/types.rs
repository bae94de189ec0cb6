use core::fmt;

use embassy_time::Duration;
use heapless::Vec;

use crate::types::{Band, PowerMode};

pub const MAX_SCAN_CHANNELS: usize = 16;

pub type ChannelList = Vec<ScanChannel, MAX_SCAN_CHANNELS>;

/// Consumer of the scan results, echoed back in the completion report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanTag {
    CurrentBss,
    #[default]
    AppOneShot,
    AppPeriodic,
    DriverPeriodic,
    Measurement,
    Immediate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanKind {
    #[default]
    Passive,
    Active,
    TriggeredPassive {
        tid: u8,
    },
    TriggeredActive {
        tid: u8,
    },
    /// Scheduled passive scan driven by the TSF.
    Sps,
}

impl ScanKind {
    pub const fn is_sps(self) -> bool {
        matches!(self, Self::Sps)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanChannel {
    pub channel: u8,
    pub min_dwell_us: u32,
    pub max_dwell_us: u32,
    /// SPS only: channel start offset from the scan start, in TU.
    pub start_offset_tu: u32,
}

/// Listen window that forces extra dwell when the scan overlaps DTIM beacons.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DtimOverlap {
    pub dtim_period: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanParams {
    pub kind: ScanKind,
    pub band: Band,
    pub channels: ChannelList,
    pub probe_requests: u8,
    pub dtim_overlap: Option<DtimOverlap>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub params: ScanParams,
    pub tag: ScanTag,
    pub high_priority: bool,
    /// Reserve driver mode for the duration of the scan.
    pub driver_mode: bool,
    pub scan_on_driver_failure: bool,
    pub power_mode: PowerMode,
    pub send_null_data: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanStatus {
    #[default]
    Success,
    Stopped,
    GuardTimeout,
    CommandFailed,
    DriverModeFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanCompleteReport {
    pub tag: ScanTag,
    pub result_count: u8,
    pub scanned_channels: u16,
    pub tsf_error: bool,
    pub status: ScanStatus,
    pub power_save: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanState {
    #[default]
    Idle,
    WaitPowerSave,
    Scanning,
    Stopping,
    ExitPowerSave,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanError {
    Busy,
    InvalidParams,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("scan already running"),
            Self::InvalidParams => f.write_str("scan request has no channels"),
        }
    }
}

/// Last event the scan server could not place in its current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnexpectedScanEvent {
    pub state: ScanState,
    pub event: &'static str,
}
