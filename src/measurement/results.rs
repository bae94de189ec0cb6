use embassy_time::Duration;

use super::types::{ChannelLoadCounters, NoiseHistogramCounters, NOISE_HISTOGRAM_RANGES};

const SCALE: u64 = 255;

/// CCA busy fraction in 0..=255. The measured period is clipped to the requested duration.
pub fn cca_busy_fraction(counters: ChannelLoadCounters, requested: Duration) -> u8 {
    let requested_us = requested.as_micros();
    let period_us = match u64::from(counters.period_us) {
        0 => requested_us,
        period => period.min(requested_us),
    };
    if period_us == 0 {
        return 0;
    }

    let busy_us = u64::from(counters.cca_busy_us).min(period_us);
    (SCALE * busy_us / period_us) as u8
}

/// Per-bucket RPI densities in 0..=255, or `None` below `min_samples` total samples.
pub fn rpi_densities(
    counters: NoiseHistogramCounters,
    min_samples: u32,
) -> Option<[u8; NOISE_HISTOGRAM_RANGES]> {
    let total: u64 = counters.counts.iter().map(|count| u64::from(*count)).sum();
    if total == 0 || total < u64::from(min_samples) {
        return None;
    }

    let mut densities = [0u8; NOISE_HISTOGRAM_RANGES];
    for (density, count) in densities.iter_mut().zip(counters.counts) {
        *density = (SCALE * u64::from(count) / total) as u8;
    }
    Some(densities)
}
