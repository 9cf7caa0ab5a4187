use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, debug_span, warn};

use super::{Decode, Stage, StageData};
use crate::config::MissionConfig;
use crate::prelude::*;
use crate::stats::{RunStatistics, RunTotals};
use crate::telemetry::{Definitions, TelemetryExtractor, TelemetryRecord};

/// Result of decoding a single capture.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub basename: String,
    pub records: Vec<TelemetryRecord>,
    pub stats: RunStatistics,
}

/// Result of decoding a batch of captures.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Reports of captures that decoded, in input order.
    pub reports: Vec<FileReport>,
    /// Captures that failed with a configuration or I/O error.
    pub failures: Vec<(PathBuf, Error)>,
    pub totals: RunTotals,
}

#[derive(Debug)]
struct Decoder {
    priority: u32,
    patterns: Vec<Regex>,
    stage: Stage,
}

impl Decoder {
    fn matches(&self, basename: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(basename))
    }
}

/// Decodes captures with the stage chains of a [MissionConfig].
///
/// # Example
/// ```
/// use cubeds::config::MissionConfig;
/// use cubeds::telemetry::Definitions;
/// use cubeds::Processor;
///
/// let config = MissionConfig::from_reader(r#"{
///   "decoders": [
///     {"priority": 1, "regex": ["\\.kss$"], "stage": {"kind": "ax25", "frame": "86a24040"}},
///     {"priority": 2, "regex": ["\\.kss$"], "stage": {"kind": "kiss"}},
///     {"priority": 3, "regex": ["\\.kss$"], "stage": {"kind": "stitch"}},
///     {"priority": 4, "regex": ["."], "stage": {"kind": "telemetry"}}
///   ]
/// }"#.as_bytes()).unwrap();
/// let processor = Processor::new(&config, Definitions::default()).unwrap();
///
/// assert_eq!(processor.stages_for("pass.kss").len(), 4);
/// assert_eq!(processor.stages_for("pass.bin").len(), 1);
/// ```
#[derive(Debug)]
pub struct Processor {
    decoders: Vec<Decoder>,
}

impl Processor {
    /// Compile the decoder table of `config`.
    ///
    /// # Errors
    /// If any regex, stage configuration or definition is invalid.
    pub fn new(config: &MissionConfig, definitions: Definitions) -> Result<Self> {
        let extractor = Arc::new(TelemetryExtractor::new(
            Arc::new(definitions),
            config.extraction.clone(),
        )?);
        let priorities = 1..=config.max_priority();
        let mut decoders = Vec::with_capacity(config.decoders.len());
        for decoder in &config.decoders {
            if !priorities.contains(&decoder.priority) {
                warn!(
                    priority = decoder.priority,
                    regex = ?decoder.regex,
                    "decoder priority out of range, never run"
                );
                continue;
            }
            let patterns = decoder
                .regex
                .iter()
                .map(|re| Regex::new(re))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            decoders.push(Decoder {
                priority: decoder.priority,
                patterns,
                stage: Stage::from_config(&decoder.stage, &extractor)?,
            });
        }
        // stable, so table order is kept within a priority
        decoders.sort_by_key(|d| d.priority);
        Ok(Processor { decoders })
    }

    /// Stages applied to a capture with file name `basename`, in the order they run.
    #[must_use]
    pub fn stages_for(&self, basename: &str) -> Vec<&Stage> {
        self.decoders
            .iter()
            .filter(|d| d.matches(basename))
            .map(|d| &d.stage)
            .collect()
    }

    /// Decode a single capture.
    ///
    /// # Errors
    /// Only configuration errors, such as a stage handed data it cannot decode. Bad or
    /// truncated data never results in an error.
    pub fn process(&self, basename: &str, data: Vec<u8>) -> Result<FileReport> {
        let span = debug_span!("process", file = basename);
        let _guard = span.enter();

        let mut stats = RunStatistics::new(basename);
        let stages = self.stages_for(basename);
        if stages.is_empty() {
            warn!("no decoders match");
            stats.add_stat("No decoders matched");
        }

        let mut data = StageData::Raw(data);
        for stage in stages {
            data = stage.decode(data, &mut stats)?;
        }
        let records = match data {
            StageData::Records(records) => records,
            other => {
                debug!(kind = other.kind(), "stages did not produce telemetry records");
                Vec::new()
            }
        };
        Ok(FileReport {
            basename: basename.to_string(),
            records,
            stats,
        })
    }

    /// Read and decode a capture file.
    ///
    /// # Errors
    /// If the file cannot be read or see [Processor::process].
    pub fn process_file<P: AsRef<Path>>(&self, path: P) -> Result<FileReport> {
        let path = path.as_ref();
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data = std::fs::read(path)?;
        self.process(&basename, data)
    }

    /// Decode many capture files in parallel. A failure of one file does not affect the
    /// others.
    pub fn process_files<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> BatchReport {
        let zults: Vec<(PathBuf, Result<FileReport>)> = paths
            .par_iter()
            .map(|path| (path.as_ref().to_path_buf(), self.process_file(path)))
            .collect();

        let mut batch = BatchReport::default();
        for (path, zult) in zults {
            match zult {
                Ok(report) => {
                    batch.totals.add(&report.stats);
                    batch.reports.push(report);
                }
                Err(err) => {
                    warn!(path = %path.display(), "failed to process: {err}");
                    batch.failures.push((path, err));
                }
            }
        }
        batch
    }
}
