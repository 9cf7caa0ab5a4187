//! Telemetry point extraction.
//!
//! Packet and point definitions are authored elsewhere and handed to this crate as
//! [Definitions]. For every packet of a defined APID each point is unpacked from the
//! packet bytes, calibrated and range checked into a [TelemetryRecord].
mod definitions;
mod extract;
mod unpack;

pub use definitions::{
    Calibration, DataType, Definitions, Endian, PacketDefinition, PointDefinition,
};
pub use extract::{
    ExtractOptions, TelemetryExtractor, TelemetryRecord, Value, TAI_EPOCH_UNIX_SECS,
    TIME_INDEX_KEY,
};
pub use unpack::{RawValue, UnpackFormat};
