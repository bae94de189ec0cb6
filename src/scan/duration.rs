use embassy_time::Duration;

use super::types::ScanParams;

const TU_US: u64 = 1_024;

/// Worst-case time the firmware needs to cover every channel of `params`.
pub fn scan_duration(params: &ScanParams, dtim_listen: Duration) -> Duration {
    let mut duration_us = if params.kind.is_sps() {
        params
            .channels
            .iter()
            .map(|channel| {
                u64::from(channel.start_offset_tu) * TU_US + u64::from(channel.max_dwell_us)
            })
            .max()
            .unwrap_or(0)
    } else {
        params
            .channels
            .iter()
            .map(|channel| u64::from(channel.max_dwell_us))
            .sum()
    };
    duration_us = duration_us.div_ceil(1_000) * 1_000;

    if let Some(overlap) = params.dtim_overlap {
        let dtim_period_us = overlap.dtim_period.as_micros();
        if dtim_period_us > 0 {
            let wakeups = duration_us / dtim_period_us + 1;
            duration_us += wakeups * dtim_listen.as_micros();
        }
    }

    Duration::from_micros(duration_us)
}

pub fn guard_interval(params: &ScanParams, dtim_listen: Duration, margin: Duration) -> Duration {
    scan_duration(params, dtim_listen) + margin
}
