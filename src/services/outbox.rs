use heapless::{Deque, Vec};
use log::warn;

use crate::measurement::MeasurementReply;
use crate::power::PowerNotice;
use crate::scan::{ScanCompleteReport, ScanTag};
use crate::types::{CommandStatus, MacFailure, PsTransition};

pub const MAX_NOTIFICATIONS: usize = 8;
const MAX_POWER_NOTICES: usize = 8;
const MAX_FAILURES: usize = 3;

/// Completion message handed back to the caller of the facade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MacNotification {
    PowerSaveComplete(PsTransition),
    PowerCommandAccepted(CommandStatus),
    ScanCommandAccepted { tag: ScanTag, status: CommandStatus },
    ScanComplete(ScanCompleteReport),
    MeasurementCommandAccepted(CommandStatus),
    MeasurementComplete(MeasurementReply),
}

pub type Notifications = Vec<MacNotification, MAX_NOTIFICATIONS>;

pub(crate) type Failures = Vec<MacFailure, MAX_FAILURES>;

/// Everything a dispatch produced that has to leave the server that produced it.
#[derive(Default)]
pub(crate) struct Outbox {
    power: Deque<PowerNotice, MAX_POWER_NOTICES>,
    notifications: Notifications,
    failures: Failures,
}

impl Outbox {
    pub(crate) fn power_notice(&mut self, notice: PowerNotice) {
        if self.power.push_back(notice).is_err() {
            warn!("outbox: power notice dropped client={:?}", notice.client);
        }
    }

    pub(crate) fn next_power_notice(&mut self) -> Option<PowerNotice> {
        self.power.pop_front()
    }

    pub(crate) fn notify(&mut self, notification: MacNotification) {
        if let Err(dropped) = self.notifications.push(notification) {
            warn!("outbox: notification dropped {:?}", dropped);
        }
    }

    pub(crate) fn escalate(&mut self, failure: MacFailure) {
        if self.failures.push(failure).is_err() {
            warn!("outbox: failure dropped {:?}", failure);
        }
    }

    pub(crate) fn take_notifications(&mut self) -> Notifications {
        core::mem::take(&mut self.notifications)
    }

    pub(crate) fn take_failures(&mut self) -> Failures {
        core::mem::take(&mut self.failures)
    }
}
