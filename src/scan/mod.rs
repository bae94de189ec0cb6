//! Scan server: drives one firmware scan at a time under a retrying guard timer.

mod duration;
mod engine;
mod machine;
mod recovery;
mod types;

pub use duration::{guard_interval, scan_duration};
pub(crate) use engine::ScanServer;
pub use recovery::{RecoveryDecision, ScanRecoveryBudget};
pub use types::{
    ChannelList, DtimOverlap, ScanChannel, ScanCompleteReport, ScanError, ScanKind, ScanParams,
    ScanRequest, ScanState, ScanStatus, ScanTag, UnexpectedScanEvent, MAX_SCAN_CHANNELS,
};
