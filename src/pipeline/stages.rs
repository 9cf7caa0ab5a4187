use std::sync::Arc;

use tracing::debug;

use super::{wrong_input, Decode, StageData};
use crate::config::StageConfig;
use crate::framing::{kiss, Ax25Deframer, Synchronizer, VcduDemultiplexer};
use crate::prelude::*;
use crate::spacepacket::{
    find_ccsds_packets, parse_fragments, Apid, ApidDemultiplexer, Packet, PacketHeader,
    Reassembler, SegmentOffsets,
};
use crate::stats::RunStatistics;
use crate::telemetry::TelemetryExtractor;

/// Raw capture to AX.25 frame payloads.
#[derive(Debug, Clone)]
pub struct Ax25Stage {
    deframer: Ax25Deframer,
}

impl Ax25Stage {
    #[must_use]
    pub fn new(deframer: Ax25Deframer) -> Self {
        Ax25Stage { deframer }
    }
}

impl Decode for Ax25Stage {
    fn name(&self) -> &'static str {
        "ax25"
    }

    fn decode(&self, input: StageData, stats: &mut RunStatistics) -> Result<StageData> {
        let buf = match input {
            StageData::Raw(buf) => buf,
            other => return Err(wrong_input(self.name(), "raw", &other)),
        };
        let zult = self.deframer.deframe(&buf);
        stats.counters.frames_found += zult.found;
        stats.counters.frames_short += zult.short;
        stats.add_stat(format!("Found {} AX.25 packets", zult.found));
        if zult.short > 0 {
            stats.add_stat(format!("Dropped {} short AX.25 packets", zult.short));
        }
        Ok(StageData::Frames(zult.frames))
    }
}

/// Reverses KISS escaping of a raw capture or of each frame.
#[derive(Debug, Clone, Default)]
pub struct KissStage;

impl Decode for KissStage {
    fn name(&self) -> &'static str {
        "kiss"
    }

    fn decode(&self, input: StageData, stats: &mut RunStatistics) -> Result<StageData> {
        match input {
            StageData::Raw(buf) => {
                let zult = kiss::unstuff(&buf);
                stats.counters.malformed_escapes += zult.malformed;
                stats.add_stat(format!(
                    "Unstuffed {} bytes to {} bytes",
                    buf.len(),
                    zult.data.len()
                ));
                Ok(StageData::Raw(zult.data))
            }
            StageData::Frames(frames) => {
                let mut malformed = 0;
                let frames: Vec<Vec<u8>> = frames
                    .iter()
                    .map(|frame| {
                        let zult = kiss::unstuff(frame);
                        malformed += zult.malformed;
                        zult.data
                    })
                    .collect();
                stats.counters.malformed_escapes += malformed;
                stats.add_stat(format!(
                    "Unstuffed {} frames, {malformed} malformed escapes",
                    frames.len()
                ));
                Ok(StageData::Frames(frames))
            }
            other => Err(wrong_input(self.name(), "raw or frames", &other)),
        }
    }
}

/// Raw capture of VCDU frames to the packets they carry.
#[derive(Debug, Clone)]
pub struct VcduStage {
    demux: VcduDemultiplexer,
}

impl VcduStage {
    #[must_use]
    pub fn new(demux: VcduDemultiplexer) -> Self {
        VcduStage { demux }
    }
}

impl Decode for VcduStage {
    fn name(&self) -> &'static str {
        "vcdu"
    }

    fn decode(&self, input: StageData, stats: &mut RunStatistics) -> Result<StageData> {
        let buf = match input {
            StageData::Raw(buf) => buf,
            other => return Err(wrong_input(self.name(), "raw", &other)),
        };
        let zult = self.demux.demux(&buf);
        let c = &mut stats.counters;
        c.vcdu_frames += zult.headers.len();
        c.vcdu_frames_rejected += zult.rejected;
        c.vcdu_discontinuities += zult.discontinuities;
        c.missing_packets += zult.missing_packets;
        stats.add_stat(format!(
            "Found {} VCDU frames, {} rejected",
            zult.headers.len(),
            zult.rejected
        ));
        stats.add_stat(format!("Found {} CCSDS packets in VCDUs", zult.packets.len()));
        Ok(StageData::Frames(zult.packets))
    }
}

/// Frames to reassembled packets.
#[derive(Debug, Clone, Default)]
pub struct StitchStage {
    reassembler: Reassembler,
}

impl StitchStage {
    #[must_use]
    pub fn new(reassembler: Reassembler) -> Self {
        StitchStage { reassembler }
    }
}

impl Decode for StitchStage {
    fn name(&self) -> &'static str {
        "stitch"
    }

    fn decode(&self, input: StageData, stats: &mut RunStatistics) -> Result<StageData> {
        let frames = match input {
            StageData::Frames(frames) => frames,
            other => return Err(wrong_input(self.name(), "frames", &other)),
        };
        let parsed = parse_fragments(&frames);
        let zult = self.reassembler.reassemble(&parsed.fragments);
        let c = &mut stats.counters;
        c.fragments_skipped += parsed.skipped;
        c.packets_stitched += zult.packets.len();
        c.packets_partial += zult.partial;
        c.segments_orphaned += zult.orphaned;
        c.segments_duplicate += zult.duplicates;
        stats.add_stat(format!(
            "Stitched together {} CCSDS packets, {} partial",
            zult.packets.len(),
            zult.partial
        ));
        Ok(StageData::Packets(zult.packets))
    }
}

/// Removes a wrapper from frames carrying packets with a particular APID.
#[derive(Debug, Clone)]
pub struct StripPayloadStage {
    apid: Apid,
    strip_len: usize,
}

impl StripPayloadStage {
    #[must_use]
    pub fn new(apid: Apid, strip_len: usize) -> Self {
        StripPayloadStage { apid, strip_len }
    }

    fn strip(&self, frame: Vec<u8>) -> Option<Vec<u8>> {
        let header = match PacketHeader::decode(&frame) {
            Ok(header) => header,
            Err(err) => {
                debug!("skipping frame: {err}");
                return None;
            }
        };
        if header.apid != self.apid {
            return Some(frame);
        }
        let end = frame.len().saturating_sub(1);
        match frame.get(self.strip_len..end) {
            Some(inner) => Some(inner.to_vec()),
            None => {
                debug!(
                    apid = header.apid,
                    len = frame.len(),
                    "frame too short to strip, skipping"
                );
                None
            }
        }
    }
}

impl Decode for StripPayloadStage {
    fn name(&self) -> &'static str {
        "strip_payload"
    }

    fn decode(&self, input: StageData, stats: &mut RunStatistics) -> Result<StageData> {
        let frames = match input {
            StageData::Frames(frames) => frames,
            other => return Err(wrong_input(self.name(), "frames", &other)),
        };
        let total = frames.len();
        let frames: Vec<Vec<u8>> = frames.into_iter().filter_map(|f| self.strip(f)).collect();
        stats.counters.fragments_skipped += total - frames.len();
        stats.add_stat(format!(
            "Stripped payload wrappers, kept {} of {total} frames",
            frames.len()
        ));
        Ok(StageData::Frames(frames))
    }
}

/// Last-resort search of a raw capture for packets.
#[derive(Debug, Clone)]
pub struct SearchStage {
    apids: Vec<Apid>,
    offsets: SegmentOffsets,
}

impl SearchStage {
    #[must_use]
    pub fn new(apids: Vec<Apid>, offsets: SegmentOffsets) -> Self {
        SearchStage { apids, offsets }
    }
}

impl Decode for SearchStage {
    fn name(&self) -> &'static str {
        "search"
    }

    fn decode(&self, input: StageData, stats: &mut RunStatistics) -> Result<StageData> {
        let buf = match input {
            StageData::Raw(buf) => buf,
            other => return Err(wrong_input(self.name(), "raw", &other)),
        };
        let packets = find_ccsds_packets(&buf, &self.apids, &self.offsets);
        stats.counters.packets_searched += packets.len();
        stats.add_stat(format!("Found {} CCSDS packets by search", packets.len()));
        Ok(StageData::Packets(packets))
    }
}

/// Packets to telemetry records.
#[derive(Debug, Clone)]
pub struct TelemetryStage {
    extractor: Arc<TelemetryExtractor>,
    demux: ApidDemultiplexer,
}

impl TelemetryStage {
    #[must_use]
    pub fn new(extractor: Arc<TelemetryExtractor>, demux: ApidDemultiplexer) -> Self {
        TelemetryStage { extractor, demux }
    }
}

impl Decode for TelemetryStage {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    fn decode(&self, input: StageData, stats: &mut RunStatistics) -> Result<StageData> {
        let packets = match input {
            StageData::Packets(packets) => packets,
            // packets straight from the VCDU stage, already whole
            StageData::Frames(frames) => {
                let total = frames.len();
                let packets: Vec<Packet> = frames
                    .into_iter()
                    .filter_map(|f| Packet::decode(f).ok())
                    .collect();
                stats.counters.fragments_skipped += total - packets.len();
                packets
            }
            other => return Err(wrong_input(self.name(), "packets or frames", &other)),
        };
        let demuxed = self.demux.demux(packets, self.extractor.definitions());
        stats.counters.packets_unwrap_failed += demuxed.unwrap_failed;
        let defined = demuxed.buckets.values().filter(|b| b.is_defined()).count();
        stats.add_stat(format!(
            "Sorted packets into {} APIDs, {defined} defined",
            demuxed.buckets.len()
        ));
        let records = self
            .extractor
            .extract(&demuxed.buckets, &mut stats.counters)?;
        stats.add_stat(format!("Extracted {} telemetry records", records.len()));
        Ok(StageData::Records(records))
    }
}

/// One of the supported decoder stages.
#[derive(Debug, Clone)]
pub enum Stage {
    Ax25(Ax25Stage),
    Kiss(KissStage),
    Vcdu(VcduStage),
    Stitch(StitchStage),
    StripPayload(StripPayloadStage),
    Search(SearchStage),
    Telemetry(TelemetryStage),
}

impl Stage {
    /// Build a stage from its configuration. Telemetry stages share `extractor`.
    ///
    /// # Errors
    /// If the configuration is not valid, e.g., a sync marker is not valid hex.
    pub fn from_config(config: &StageConfig, extractor: &Arc<TelemetryExtractor>) -> Result<Self> {
        let stage = match config {
            StageConfig::Ax25 {
                frame,
                header_length,
            } => Stage::Ax25(Ax25Stage::new(Ax25Deframer::new(
                Synchronizer::from_hex(frame)?,
                *header_length,
            ))),
            StageConfig::Kiss => Stage::Kiss(KissStage),
            StageConfig::Vcdu(opts) => Stage::Vcdu(VcduStage::new(VcduDemultiplexer::new(*opts)?)),
            StageConfig::Stitch { offsets } => {
                Stage::Stitch(StitchStage::new(Reassembler::new(*offsets)))
            }
            StageConfig::StripPayload { apid, strip_len } => {
                Stage::StripPayload(StripPayloadStage::new(*apid, *strip_len))
            }
            StageConfig::Search { apids, offsets } => {
                Stage::Search(SearchStage::new(apids.clone(), *offsets))
            }
            StageConfig::Telemetry {
                wrapper_apid,
                wrapper_length,
            } => Stage::Telemetry(TelemetryStage::new(
                Arc::clone(extractor),
                ApidDemultiplexer::new(*wrapper_apid, *wrapper_length),
            )),
        };
        Ok(stage)
    }

    fn inner(&self) -> &dyn Decode {
        match self {
            Stage::Ax25(s) => s,
            Stage::Kiss(s) => s,
            Stage::Vcdu(s) => s,
            Stage::Stitch(s) => s,
            Stage::StripPayload(s) => s,
            Stage::Search(s) => s,
            Stage::Telemetry(s) => s,
        }
    }
}

impl Decode for Stage {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn decode(&self, input: StageData, stats: &mut RunStatistics) -> Result<StageData> {
        let stage = self.inner();
        let len = input.len();
        let zult = stage.decode(input, stats)?;
        debug!(
            stage = stage.name(),
            input = len,
            output = zult.len(),
            kind = zult.kind(),
            "stage complete"
        );
        Ok(zult)
    }
}
