//! Decoding of downlinked small-spacecraft radio captures into engineering telemetry.
//!
//! A capture runs through an ordered chain of decoder stages chosen per file from a
//! [config::MissionConfig]:
//!
//! 1. [framing] locates link-layer frames by sync marker and strips AX.25 headers, KISS
//!    escapes or VCDU transfer frame headers.
//! 2. [spacepacket] parses CCSDS-style packet headers, reassembles segmented packets and
//!    sorts them by APID.
//! 3. [telemetry] unpacks, calibrates and filters the points of each packet into a
//!    [telemetry::TelemetryRecord].
//!
//! [pipeline::Processor] ties the stages together for a single capture or a batch of
//! captures and [stats] collects what happened along the way.
pub mod bits;
pub mod config;
mod error;
pub mod framing;
pub mod pipeline;
pub mod spacepacket;
pub mod stats;
pub mod telemetry;

pub(crate) mod prelude {
    pub(crate) use crate::error::{Error, Result};
}

pub use error::{Error, Result};
pub use pipeline::{BatchReport, FileReport, Processor};
