use embassy_time::Duration;

use crate::measurement::NOISE_HISTOGRAM_RANGES;

pub const POWER_SAVE_GUARD_MS: u64 = 5_000;
pub const HANG_OVER_PERIOD: u8 = 10;
pub const NULL_PACKET_RETRIES: u8 = 1;
pub const SCAN_GUARD_MARGIN_MS: u64 = 62_000;
pub const SCAN_RECOVERY_THRESHOLD: u8 = 3;
pub const DTIM_LISTEN_MS: u64 = 10;
pub const MEASUREMENT_START_STOP_GUARD_MS: u64 = 100;
pub const NOISE_HISTOGRAM_MIN_SAMPLES: u32 = 100;

/// RPI bucket thresholds in dBm (802.11k noise histogram defaults).
pub const NOISE_HISTOGRAM_RANGES_DBM: [i8; NOISE_HISTOGRAM_RANGES] =
    [-87, -82, -77, -72, -67, -62, -57, -52];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacServicesConfig {
    pub power_save_guard: Duration,
    pub hang_over_period: u8,
    pub null_packet_retries: u8,
    pub scan_guard_margin: Duration,
    pub scan_recovery_threshold: u8,
    pub dtim_listen: Duration,
    pub measurement_start_stop_guard: Duration,
    pub noise_histogram_min_samples: u32,
    pub noise_histogram_ranges: [i8; NOISE_HISTOGRAM_RANGES],
}

impl MacServicesConfig {
    pub const fn default_const() -> Self {
        Self {
            power_save_guard: Duration::from_millis(POWER_SAVE_GUARD_MS),
            hang_over_period: HANG_OVER_PERIOD,
            null_packet_retries: NULL_PACKET_RETRIES,
            scan_guard_margin: Duration::from_millis(SCAN_GUARD_MARGIN_MS),
            scan_recovery_threshold: SCAN_RECOVERY_THRESHOLD,
            dtim_listen: Duration::from_millis(DTIM_LISTEN_MS),
            measurement_start_stop_guard: Duration::from_millis(MEASUREMENT_START_STOP_GUARD_MS),
            noise_histogram_min_samples: NOISE_HISTOGRAM_MIN_SAMPLES,
            noise_histogram_ranges: NOISE_HISTOGRAM_RANGES_DBM,
        }
    }
}

impl Default for MacServicesConfig {
    fn default() -> Self {
        Self::default_const()
    }
}
