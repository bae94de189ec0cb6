use core::sync::atomic::{AtomicU32, Ordering};

static POWER_TRANSITIONS: AtomicU32 = AtomicU32::new(0);
static POWER_FAILURES: AtomicU32 = AtomicU32::new(0);
static POWER_ESCALATIONS: AtomicU32 = AtomicU32::new(0);
static SCANS_STARTED: AtomicU32 = AtomicU32::new(0);
static SCANS_COMPLETED: AtomicU32 = AtomicU32::new(0);
static SCAN_GUARD_RECOVERIES: AtomicU32 = AtomicU32::new(0);
static SCAN_ESCALATIONS: AtomicU32 = AtomicU32::new(0);
static MEASUREMENTS_STARTED: AtomicU32 = AtomicU32::new(0);
static MEASUREMENTS_COMPLETED: AtomicU32 = AtomicU32::new(0);
static MEASUREMENTS_REJECTED_DELAY: AtomicU32 = AtomicU32::new(0);
static MEASUREMENT_ESCALATIONS: AtomicU32 = AtomicU32::new(0);
static UNEXPECTED_EVENTS: AtomicU32 = AtomicU32::new(0);
static RESETS: AtomicU32 = AtomicU32::new(0);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MacCounters {
    pub power_transitions: u32,
    pub power_failures: u32,
    pub power_escalations: u32,
    pub scans_started: u32,
    pub scans_completed: u32,
    pub scan_guard_recoveries: u32,
    pub scan_escalations: u32,
    pub measurements_started: u32,
    pub measurements_completed: u32,
    pub measurements_rejected_delay: u32,
    pub measurement_escalations: u32,
    pub unexpected_events: u32,
    pub resets: u32,
}

pub fn snapshot() -> MacCounters {
    MacCounters {
        power_transitions: POWER_TRANSITIONS.load(Ordering::Relaxed),
        power_failures: POWER_FAILURES.load(Ordering::Relaxed),
        power_escalations: POWER_ESCALATIONS.load(Ordering::Relaxed),
        scans_started: SCANS_STARTED.load(Ordering::Relaxed),
        scans_completed: SCANS_COMPLETED.load(Ordering::Relaxed),
        scan_guard_recoveries: SCAN_GUARD_RECOVERIES.load(Ordering::Relaxed),
        scan_escalations: SCAN_ESCALATIONS.load(Ordering::Relaxed),
        measurements_started: MEASUREMENTS_STARTED.load(Ordering::Relaxed),
        measurements_completed: MEASUREMENTS_COMPLETED.load(Ordering::Relaxed),
        measurements_rejected_delay: MEASUREMENTS_REJECTED_DELAY.load(Ordering::Relaxed),
        measurement_escalations: MEASUREMENT_ESCALATIONS.load(Ordering::Relaxed),
        unexpected_events: UNEXPECTED_EVENTS.load(Ordering::Relaxed),
        resets: RESETS.load(Ordering::Relaxed),
    }
}

pub(crate) fn record_power_transition(success: bool) {
    POWER_TRANSITIONS.fetch_add(1, Ordering::Relaxed);
    if !success {
        POWER_FAILURES.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) fn record_power_escalation() {
    POWER_ESCALATIONS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_scan_started() {
    SCANS_STARTED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_scan_completed() {
    SCANS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_scan_guard_recovery() {
    SCAN_GUARD_RECOVERIES.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_scan_escalation() {
    SCAN_ESCALATIONS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_measurement_started() {
    MEASUREMENTS_STARTED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_measurement_completed() {
    MEASUREMENTS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_measurement_rejected_delay() {
    MEASUREMENTS_REJECTED_DELAY.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_measurement_escalation() {
    MEASUREMENT_ESCALATIONS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_unexpected_event() {
    UNEXPECTED_EVENTS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_reset() {
    RESETS.fetch_add(1, Ordering::Relaxed);
}
