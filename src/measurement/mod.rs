//! Measurement server: radio measurements on a target channel under driver mode.

mod engine;
mod machine;
mod results;
#[cfg(test)]
mod tests;
mod types;

pub(crate) use engine::MeasurementServer;
pub use results::{cca_busy_fraction, rpi_densities};
pub use types::{
    BeaconScanMode, ChannelLoadCounters, MeasurementError, MeasurementKind, MeasurementReply,
    MeasurementRequest, MeasurementState, MeasurementStatus, MeasurementTypeRequest,
    MeasurementValue, NoiseHistogramCounters, TypeReply, UnexpectedMeasurementEvent,
    MAX_MEASUREMENT_TYPES, NOISE_HISTOGRAM_RANGES,
};
