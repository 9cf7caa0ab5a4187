//! Mission configuration.
//!
//! A [MissionConfig] names the decoder stages applied to each capture, selected by regular
//! expressions on the capture's file name, and the options used for telemetry extraction.
use std::{fs::File, io::Read, path::Path};

use serde::{Deserialize, Serialize};

use crate::framing::{VcduOpts, DEFAULT_AX25_HEADER_LEN};
use crate::prelude::*;
use crate::spacepacket::{Apid, SegmentOffsets, DEFAULT_WRAPPER_APID, DEFAULT_WRAPPER_LEN};
use crate::telemetry::ExtractOptions;

fn default_ax25_header_length() -> usize {
    DEFAULT_AX25_HEADER_LEN
}

fn default_wrapper_apid() -> Apid {
    DEFAULT_WRAPPER_APID
}

fn default_wrapper_length() -> usize {
    DEFAULT_WRAPPER_LEN
}

/// A single decoder stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageConfig {
    /// Locate frames by hex encoded sync marker and strip `header_length` bytes from each,
    /// counted from the start of the marker.
    Ax25 {
        frame: String,
        #[serde(default = "default_ax25_header_length")]
        header_length: usize,
    },
    /// Reverse KISS escaping of every frame.
    Kiss,
    /// Extract packets from fixed size VCDU frames.
    Vcdu(VcduOpts),
    /// Reassemble segmented packets.
    Stitch {
        #[serde(default)]
        offsets: SegmentOffsets,
    },
    /// Drop `strip_len` leading bytes and the final byte of frames holding packets with
    /// `apid`.
    StripPayload { apid: Apid, strip_len: usize },
    /// Search raw data for plausible packets with one of `apids`.
    Search {
        apids: Vec<Apid>,
        #[serde(default)]
        offsets: SegmentOffsets,
    },
    /// Sort packets by APID and extract telemetry.
    Telemetry {
        #[serde(default = "default_wrapper_apid")]
        wrapper_apid: Apid,
        #[serde(default = "default_wrapper_length")]
        wrapper_length: usize,
    },
}

/// A stage and the captures it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Stages run in ascending priority.
    pub priority: u32,
    /// The stage applies to captures whose file name matches any of these.
    pub regex: Vec<String>,
    pub stage: StageConfig,
}

/// # Example
/// ```
/// use cubeds::config::{MissionConfig, StageConfig};
///
/// let config = MissionConfig::from_reader(r#"{
///   "mission": "demo",
///   "decoders": [
///     {"priority": 1, "regex": ["\\.kss$"], "stage": {"kind": "ax25", "frame": "86a24040"}},
///     {"priority": 2, "regex": ["\\.kss$"], "stage": {"kind": "kiss"}}
///   ]
/// }"#.as_bytes()).unwrap();
/// assert_eq!(config.decoders[1].stage, StageConfig::Kiss);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionConfig {
    #[serde(default)]
    pub mission: String,
    pub decoders: Vec<DecoderConfig>,
    #[serde(default)]
    pub extraction: ExtractOptions,
}

impl MissionConfig {
    /// Load a JSON config.
    ///
    /// # Errors
    /// If the data is not a valid JSON config.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Load a JSON config from a file.
    ///
    /// # Errors
    /// If the file cannot be read or is not a valid JSON config.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Highest decoder priority, 0 if there are no decoders.
    #[must_use]
    pub fn max_priority(&self) -> u32 {
        self.decoders.iter().map(|d| d.priority).max().unwrap_or(0)
    }
}
