//! Decoder stage chains.
//!
//! Each capture is decoded by an ordered chain of [Stage]s chosen by [Processor]. Stages
//! consume the whole output of the previous stage as [StageData] and report what they did
//! in the capture's [RunStatistics].
mod processor;
mod stages;

use crate::prelude::*;
use crate::spacepacket::Packet;
use crate::stats::RunStatistics;
use crate::telemetry::TelemetryRecord;

pub use processor::{BatchReport, FileReport, Processor};
pub use stages::{
    Ax25Stage, KissStage, SearchStage, Stage, StitchStage, StripPayloadStage, TelemetryStage,
    VcduStage,
};

/// Data passed between stages.
#[derive(Debug, Clone, PartialEq)]
pub enum StageData {
    /// An entire capture
    Raw(Vec<u8>),
    /// Frame or packet bytes
    Frames(Vec<Vec<u8>>),
    Packets(Vec<Packet>),
    Records(Vec<TelemetryRecord>),
}

impl StageData {
    /// Name of the kind of data, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StageData::Raw(_) => "raw",
            StageData::Frames(_) => "frames",
            StageData::Packets(_) => "packets",
            StageData::Records(_) => "records",
        }
    }

    /// Number of bytes, frames, packets or records.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            StageData::Raw(dat) => dat.len(),
            StageData::Frames(frames) => frames.len(),
            StageData::Packets(packets) => packets.len(),
            StageData::Records(records) => records.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single decoder stage.
pub trait Decode: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode `input`, recording yields in `stats`.
    ///
    /// # Errors
    /// [Error::StageInput] if the stage cannot decode this kind of data, or any
    /// configuration error surfaced while decoding. Bad data is never an error.
    fn decode(&self, input: StageData, stats: &mut RunStatistics) -> Result<StageData>;
}

fn wrong_input(stage: &'static str, expected: &'static str, input: &StageData) -> Error {
    Error::StageInput {
        stage,
        expected,
        actual: input.kind(),
    }
}
