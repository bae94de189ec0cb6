//! Power-save server: arbitrates the user power policy against driver-mode reservations.

mod engine;
mod machine;
mod types;

pub(crate) use engine::PowerServer;
pub use types::{PowerError, PowerNotice, PowerReply, PowerState, UnexpectedPowerEvent};
