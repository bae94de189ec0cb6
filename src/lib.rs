#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod measurement;
pub mod platform;
pub mod power;
#[cfg(feature = "embassy-runtime")]
pub mod runtime;
pub mod scan;
mod services;
pub mod telemetry;
#[cfg(test)]
mod testing;
pub mod types;

pub use config::MacServicesConfig;
pub use services::{FailureHandler, MacNotification, MacOutput, MacServices, Notifications};
pub use types::{Band, CommandStatus, MacFailure, PowerClient, PowerMode, PsTransition, RateMask};
