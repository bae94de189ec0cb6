use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};
use embassy_time::{Duration, Instant};
use macservices::measurement::{
    ChannelLoadCounters, MeasurementKind, MeasurementRequest, MeasurementTypeRequest,
    NoiseHistogramCounters, MAX_MEASUREMENT_TYPES, NOISE_HISTOGRAM_RANGES,
};
use macservices::platform::{CommandKind, GuardTimer, ReadPayload, ScanCompleteEvent};
use macservices::scan::{
    ScanChannel, ScanKind, ScanParams, ScanRequest, ScanTag, MAX_SCAN_CHANNELS,
};
use macservices::{Band, MacServicesConfig, PowerMode, PsTransition};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: ConfigOverrides,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    power_save_guard_ms: Option<u64>,
    scan_guard_margin_ms: Option<u64>,
    scan_recovery_threshold: Option<u8>,
    measurement_start_stop_guard_ms: Option<u64>,
    noise_histogram_min_samples: Option<u32>,
}

impl ConfigOverrides {
    pub fn apply(&self) -> MacServicesConfig {
        let mut config = MacServicesConfig::default();
        if let Some(ms) = self.power_save_guard_ms {
            config.power_save_guard = Duration::from_millis(ms);
        }
        if let Some(ms) = self.scan_guard_margin_ms {
            config.scan_guard_margin = Duration::from_millis(ms);
        }
        if let Some(threshold) = self.scan_recovery_threshold {
            config.scan_recovery_threshold = threshold;
        }
        if let Some(ms) = self.measurement_start_stop_guard_ms {
            config.measurement_start_stop_guard = Duration::from_millis(ms);
        }
        if let Some(samples) = self.noise_histogram_min_samples {
            config.noise_histogram_min_samples = samples;
        }
        config
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    SetPsMode {
        mode: ModeName,
        #[serde(default)]
        send_null_data: bool,
    },
    StartScan(ScanStep),
    StopScan {
        tag: TagName,
        #[serde(default)]
        send_null_data: bool,
    },
    StartMeasurement(MeasurementStep),
    StopMeasurement {
        #[serde(default)]
        send_null_data: bool,
    },
    PowerReport {
        transition: TransitionName,
    },
    ScanComplete(ScanCompleteStep),
    MeasurementStarted,
    MeasurementComplete,
    Response(ResponseStep),
    Expire {
        timer: TimerName,
        #[serde(default)]
        index: u8,
        #[serde(default)]
        was_reset: bool,
    },
    Advance {
        ms: u64,
    },
    Reject {
        command: CommandName,
    },
    AcceptAll,
    Reset,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeName {
    Active,
    PowerSave,
    KeepCurrent,
}

impl From<ModeName> for PowerMode {
    fn from(mode: ModeName) -> Self {
        match mode {
            ModeName::Active => Self::Active,
            ModeName::PowerSave => Self::PowerSave,
            ModeName::KeepCurrent => Self::KeepCurrent,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionName {
    EnterSuccess,
    EnterFail,
    ExitSuccess,
    ExitFail,
}

impl From<TransitionName> for PsTransition {
    fn from(transition: TransitionName) -> Self {
        match transition {
            TransitionName::EnterSuccess => Self::EnterSuccess,
            TransitionName::EnterFail => Self::EnterFail,
            TransitionName::ExitSuccess => Self::ExitSuccess,
            TransitionName::ExitFail => Self::ExitFail,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagName {
    CurrentBss,
    #[default]
    AppOneShot,
    AppPeriodic,
    DriverPeriodic,
    Measurement,
    Immediate,
}

impl From<TagName> for ScanTag {
    fn from(tag: TagName) -> Self {
        match tag {
            TagName::CurrentBss => Self::CurrentBss,
            TagName::AppOneShot => Self::AppOneShot,
            TagName::AppPeriodic => Self::AppPeriodic,
            TagName::DriverPeriodic => Self::DriverPeriodic,
            TagName::Measurement => Self::Measurement,
            TagName::Immediate => Self::Immediate,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKindName {
    #[default]
    Passive,
    Active,
    Sps,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandName {
    #[default]
    Ghz2_4,
    Ghz5,
}

impl From<BandName> for Band {
    fn from(band: BandName) -> Self {
        match band {
            BandName::Ghz2_4 => Self::Ghz2_4,
            BandName::Ghz5 => Self::Ghz5,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanStep {
    #[serde(default)]
    tag: TagName,
    #[serde(default)]
    kind: ScanKindName,
    #[serde(default)]
    band: BandName,
    channels: Vec<u8>,
    #[serde(default = "default_dwell_ms")]
    max_dwell_ms: u32,
    #[serde(default)]
    driver_mode: bool,
    #[serde(default)]
    scan_on_driver_failure: bool,
    #[serde(default = "default_scan_mode")]
    power_mode: ModeName,
}

fn default_dwell_ms() -> u32 {
    30
}

fn default_scan_mode() -> ModeName {
    ModeName::PowerSave
}

impl ScanStep {
    pub fn request(&self) -> Result<ScanRequest> {
        if self.channels.len() > MAX_SCAN_CHANNELS {
            return Err(anyhow!(
                "scan lists {} channels, at most {MAX_SCAN_CHANNELS} supported",
                self.channels.len()
            ));
        }
        let dwell_us = self.max_dwell_ms.saturating_mul(1_000);
        let channels = self
            .channels
            .iter()
            .enumerate()
            .map(|(idx, &channel)| ScanChannel {
                channel,
                min_dwell_us: dwell_us / 2,
                max_dwell_us: dwell_us,
                start_offset_tu: idx as u32 * self.max_dwell_ms,
            })
            .collect();
        let kind = match self.kind {
            ScanKindName::Passive => ScanKind::Passive,
            ScanKindName::Active => ScanKind::Active,
            ScanKindName::Sps => ScanKind::Sps,
        };

        Ok(ScanRequest {
            params: ScanParams {
                kind,
                band: self.band.into(),
                channels,
                ..ScanParams::default()
            },
            tag: self.tag.into(),
            driver_mode: self.driver_mode,
            scan_on_driver_failure: self.scan_on_driver_failure,
            power_mode: self.power_mode.into(),
            ..ScanRequest::default()
        })
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindName {
    ChannelLoad,
    NoiseHistogram,
    Beacon,
}

#[derive(Debug, Deserialize)]
pub struct TypeEntry {
    kind: KindName,
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct MeasurementStep {
    channel: u8,
    serving_channel: u8,
    #[serde(default)]
    band: BandName,
    /// Arrival time of the request frame; defaults to the replay clock.
    received_at_ms: Option<u64>,
    max_delay_ms: u64,
    types: Vec<TypeEntry>,
}

impl MeasurementStep {
    pub fn request(&self, now: Instant) -> Result<(MeasurementRequest, Duration)> {
        if self.types.len() > MAX_MEASUREMENT_TYPES {
            return Err(anyhow!(
                "measurement lists {} types, at most {MAX_MEASUREMENT_TYPES} supported",
                self.types.len()
            ));
        }
        let types = self
            .types
            .iter()
            .map(|entry| {
                let kind = match entry.kind {
                    KindName::ChannelLoad => MeasurementKind::ChannelLoad,
                    KindName::NoiseHistogram => MeasurementKind::NoiseHistogram,
                    KindName::Beacon => MeasurementKind::Beacon,
                };
                MeasurementTypeRequest::new(kind, Duration::from_millis(entry.duration_ms))
            })
            .collect();
        let request = MeasurementRequest {
            channel: self.channel,
            band: self.band.into(),
            serving_channel: self.serving_channel,
            received_at: self.received_at_ms.map(Instant::from_millis).unwrap_or(now),
            types,
        };
        Ok((request, Duration::from_millis(self.max_delay_ms)))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScanCompleteStep {
    result_count: u8,
    scanned_channels: u16,
    tsf_error: bool,
    pub sps: bool,
}

impl ScanCompleteStep {
    pub fn event(&self) -> ScanCompleteEvent {
        ScanCompleteEvent {
            result_count: self.result_count,
            scanned_channels: self.scanned_channels,
            tsf_error: self.tsf_error,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
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

impl From<CommandName> for CommandKind {
    fn from(command: CommandName) -> Self {
        match command {
            CommandName::SetPowerMode => Self::SetPowerMode,
            CommandName::Scan => Self::Scan,
            CommandName::SpsScan => Self::SpsScan,
            CommandName::StopScan => Self::StopScan,
            CommandName::StopSpsScan => Self::StopSpsScan,
            CommandName::MeasurementStart => Self::MeasurementStart,
            CommandName::MeasurementStop => Self::MeasurementStop,
            CommandName::ChannelLoadStart => Self::ChannelLoadStart,
            CommandName::ChannelLoadStop => Self::ChannelLoadStop,
            CommandName::ReadChannelLoad => Self::ReadChannelLoad,
            CommandName::NoiseHistogramStart => Self::NoiseHistogramStart,
            CommandName::NoiseHistogramStop => Self::NoiseHistogramStop,
            CommandName::ReadNoiseHistogram => Self::ReadNoiseHistogram,
            CommandName::ApDiscoveryStart => Self::ApDiscoveryStart,
            CommandName::ApDiscoveryStop => Self::ApDiscoveryStop,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResponseStep {
    pub command: CommandName,
    #[serde(default = "default_ok")]
    pub ok: bool,
    /// `[cca_busy_us, period_us]`
    channel_load: Option<[u32; 2]>,
    histogram: Option<[u32; NOISE_HISTOGRAM_RANGES]>,
}

fn default_ok() -> bool {
    true
}

impl ResponseStep {
    pub fn payload(&self) -> Option<ReadPayload> {
        if let Some([cca_busy_us, period_us]) = self.channel_load {
            return Some(ReadPayload::ChannelLoad(ChannelLoadCounters {
                cca_busy_us,
                period_us,
            }));
        }
        self.histogram
            .map(|counts| ReadPayload::NoiseHistogram(NoiseHistogramCounters { counts }))
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerName {
    PowerSave,
    Scan,
    MeasurementStartStop,
    MeasurementType,
}

impl TimerName {
    pub fn timer(self, index: u8) -> GuardTimer {
        match self {
            Self::PowerSave => GuardTimer::PowerSave,
            Self::Scan => GuardTimer::Scan,
            Self::MeasurementStartStop => GuardTimer::MeasurementStartStop,
            Self::MeasurementType => GuardTimer::MeasurementType(index),
        }
    }
}

pub fn load(path: &Path) -> Result<Scenario> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading scenario {}", path.display()))?;
    toml::from_str::<Scenario>(&raw)
        .with_context(|| format!("invalid TOML scenario {}", path.display()))
}
