use core::fmt;

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::types::Band;

pub const MAX_MEASUREMENT_TYPES: usize = 3;
pub const NOISE_HISTOGRAM_RANGES: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeasurementKind {
    ChannelLoad,
    NoiseHistogram,
    Beacon,
}

impl MeasurementKind {
    /// Kinds whose result has to be read back from the firmware after the stop.
    pub const fn needs_read(self) -> bool {
        matches!(self, Self::ChannelLoad | Self::NoiseHistogram)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BeaconScanMode {
    #[default]
    Passive,
    Active,
    BeaconTable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeasurementTypeRequest {
    pub kind: MeasurementKind,
    pub duration: Duration,
    pub scan_mode: BeaconScanMode,
}

impl MeasurementTypeRequest {
    pub const fn new(kind: MeasurementKind, duration: Duration) -> Self {
        Self {
            kind,
            duration,
            scan_mode: BeaconScanMode::Passive,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeasurementRequest {
    pub channel: u8,
    pub band: Band,
    pub serving_channel: u8,
    /// When the request frame arrived; the allowed delay counts from here.
    pub received_at: Instant,
    pub types: Vec<MeasurementTypeRequest, MAX_MEASUREMENT_TYPES>,
}

impl MeasurementRequest {
    pub fn total_duration(&self) -> Duration {
        self.types
            .iter()
            .map(|entry| entry.duration)
            .max()
            .unwrap_or(Duration::from_ticks(0))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MeasurementStatus {
    #[default]
    Success,
    Failed,
    RejectedMaxDelayPassed,
    InsufficientSamples,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MeasurementValue {
    #[default]
    None,
    /// CCA busy fraction scaled to 0..=255.
    ChannelLoad(u8),
    /// RPI densities scaled to 0..=255 per bucket.
    NoiseHistogram([u8; NOISE_HISTOGRAM_RANGES]),
    /// Beacon results go to the BSS database, not the reply.
    Beacon,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeReply {
    pub kind: MeasurementKind,
    pub status: MeasurementStatus,
    pub value: MeasurementValue,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeasurementReply {
    pub channel: u8,
    pub types: Vec<TypeReply, MAX_MEASUREMENT_TYPES>,
}

/// Raw channel-load counters read back from the firmware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelLoadCounters {
    pub cca_busy_us: u32,
    pub period_us: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoiseHistogramCounters {
    pub counts: [u32; NOISE_HISTOGRAM_RANGES],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MeasurementState {
    #[default]
    Idle,
    WaitDriverMode,
    WaitMeasureStart,
    MeasureInProgress,
    WaitMeasureStop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeasurementError {
    Busy,
    InvalidRequest,
}

impl fmt::Display for MeasurementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("measurement already running"),
            Self::InvalidRequest => f.write_str("measurement request is malformed"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnexpectedMeasurementEvent {
    pub state: MeasurementState,
    pub event: &'static str,
}
