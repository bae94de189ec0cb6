use crate::config::SCAN_RECOVERY_THRESHOLD;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Re-send the stop and complete the scan locally with a timeout status.
    Recover,
    /// Give up on the firmware and hand over to the failure handler.
    Escalate,
}

/// Counts guard expiries that were not followed by a genuine scan complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanRecoveryBudget {
    threshold: u8,
    consecutive_expiries: u8,
}

impl ScanRecoveryBudget {
    pub const fn new(threshold: u8) -> Self {
        Self {
            threshold,
            consecutive_expiries: 0,
        }
    }

    pub fn set_threshold(&mut self, threshold: u8) {
        self.threshold = threshold;
    }

    pub const fn threshold(&self) -> u8 {
        self.threshold
    }

    pub const fn consecutive_expiries(&self) -> u8 {
        self.consecutive_expiries
    }

    pub fn on_guard_expired(&mut self) -> RecoveryDecision {
        self.consecutive_expiries = self.consecutive_expiries.saturating_add(1);
        if self.consecutive_expiries >= self.threshold {
            RecoveryDecision::Escalate
        } else {
            RecoveryDecision::Recover
        }
    }

    pub fn on_scan_complete(&mut self) {
        self.consecutive_expiries = 0;
    }
}

impl Default for ScanRecoveryBudget {
    fn default() -> Self {
        Self::new(SCAN_RECOVERY_THRESHOLD)
    }
}
