//! Per-capture and per-run statistics.
use std::fmt::Display;

use serde::Serialize;

/// Counts of units handled at each stage of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCounters {
    /// Candidate AX.25 frames found by sync marker
    pub frames_found: usize,
    /// Candidate frames shorter than the link header
    pub frames_short: usize,
    /// KISS escapes that were not valid
    pub malformed_escapes: usize,
    /// VCDU frames examined
    pub vcdu_frames: usize,
    /// VCDU frames rejected by header validation
    pub vcdu_frames_rejected: usize,
    pub vcdu_discontinuities: usize,
    /// Packets missing according to sequence ids
    pub missing_packets: usize,
    /// Frames whose packet header could not be decoded
    pub fragments_skipped: usize,
    pub packets_stitched: usize,
    /// Packets emitted without their last segment
    pub packets_partial: usize,
    pub segments_orphaned: usize,
    pub segments_duplicate: usize,
    /// Packets found by searching raw data
    pub packets_searched: usize,
    pub packets_unwrap_failed: usize,
    /// Packets with an APID that has no definition
    pub packets_undefined: usize,
    pub records_extracted: usize,
    /// Records missing points because their packet was truncated
    pub records_partial: usize,
    /// Packets that yielded no record
    pub records_discarded: usize,
    pub points_out_of_range: usize,
    /// Sub-byte points that did not fit their byte
    pub points_bad_bits: usize,
}

/// Statistics for processing a single capture.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatistics {
    basefile: String,
    entries: Vec<String>,
    pub counters: StageCounters,
}

impl RunStatistics {
    #[must_use]
    pub fn new(basefile: impl Into<String>) -> Self {
        RunStatistics {
            basefile: basefile.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn basefile(&self) -> &str {
        &self.basefile
    }

    /// Append a human readable entry.
    pub fn add_stat(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

impl Display for RunStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "========== {} ==========", self.basefile)?;
        for entry in &self.entries {
            writeln!(f, "  {entry}")?;
        }
        Ok(())
    }
}

/// Totals across every capture of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub files_processed: usize,
    /// Packets handed to telemetry extraction
    pub potential_packets: usize,
    /// Packets or points removed by cleaning
    pub packets_cleaned: usize,
    pub records: usize,
}

impl RunTotals {
    pub fn add(&mut self, stats: &RunStatistics) {
        let c = &stats.counters;
        self.files_processed += 1;
        self.potential_packets += c.records_extracted + c.records_discarded;
        self.packets_cleaned += c.records_discarded + c.points_out_of_range;
        self.records += c.records_extracted;
    }
}

impl Display for RunTotals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "files processed: {}, potential packets: {}, packets cleaned: {}, records: {}",
            self.files_processed, self.potential_packets, self.packets_cleaned, self.records
        )
    }
}
