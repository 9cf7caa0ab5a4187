use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use super::{check_valid, Apid, Packet, PacketHeader, SegmentOffsets};
use crate::telemetry::{Definitions, PacketDefinition};

/// APID of packets that wrap another packet behind an extra header.
pub const DEFAULT_WRAPPER_APID: Apid = 255;
/// Bytes to skip to reach the inner packet of a wrapper packet.
pub const DEFAULT_WRAPPER_LEN: usize = 12;

/// All packets of a single APID.
#[derive(Debug, Clone)]
pub struct PacketBucket<'d> {
    pub apid: Apid,
    /// Definition used to extract telemetry, `None` if the APID is not defined.
    pub definition: Option<&'d PacketDefinition>,
    pub packets: Vec<Packet>,
}

impl PacketBucket<'_> {
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.definition.is_some()
    }
}

/// Output of [ApidDemultiplexer::demux].
#[derive(Debug, Default)]
pub struct Demuxed<'d> {
    pub buckets: BTreeMap<Apid, PacketBucket<'d>>,
    /// Wrapper packets whose inner header could not be decoded.
    pub unwrap_failed: usize,
}

impl<'d> Demuxed<'d> {
    /// Buckets that have no definition.
    pub fn undefined(&self) -> impl Iterator<Item = &PacketBucket<'d>> {
        self.buckets.values().filter(|b| !b.is_defined())
    }
}

/// Sorts packets into per-APID buckets.
#[derive(Debug, Clone)]
pub struct ApidDemultiplexer {
    wrapper_apid: Apid,
    wrapper_len: usize,
}

impl Default for ApidDemultiplexer {
    fn default() -> Self {
        Self::new(DEFAULT_WRAPPER_APID, DEFAULT_WRAPPER_LEN)
    }
}

impl ApidDemultiplexer {
    #[must_use]
    pub fn new(wrapper_apid: Apid, wrapper_len: usize) -> Self {
        ApidDemultiplexer {
            wrapper_apid,
            wrapper_len,
        }
    }

    /// Replace a wrapper packet with the packet it carries. Other packets are returned
    /// unchanged.
    fn unwrap_packet(&self, packet: Packet) -> Option<Packet> {
        if packet.header.apid != self.wrapper_apid {
            return Some(packet);
        }
        let Some(inner) = packet.data.get(self.wrapper_len..) else {
            debug!(len = packet.data.len(), "wrapper packet too short, dropping");
            return None;
        };
        match PacketHeader::decode(inner) {
            Ok(header) => {
                trace!(inner_apid = header.apid, "unwrapped packet");
                Some(Packet {
                    header,
                    data: inner.to_vec(),
                    complete: packet.complete,
                })
            }
            Err(err) => {
                debug!("failed to decode wrapped packet header: {err}");
                None
            }
        }
    }

    #[must_use]
    pub fn demux<'d>(&self, packets: Vec<Packet>, definitions: &'d Definitions) -> Demuxed<'d> {
        let mut zult = Demuxed::default();
        for packet in packets {
            let Some(packet) = self.unwrap_packet(packet) else {
                zult.unwrap_failed += 1;
                continue;
            };
            let apid = packet.header.apid;
            zult.buckets
                .entry(apid)
                .or_insert_with(|| PacketBucket {
                    apid,
                    definition: definitions.get(apid),
                    packets: Vec::new(),
                })
                .packets
                .push(packet);
        }
        for bucket in zult.undefined() {
            debug!(
                apid = bucket.apid,
                count = bucket.packets.len(),
                "no definition for apid"
            );
        }
        zult
    }
}

/// Last-resort search of a raw buffer for plausible unsegmented packets with one of
/// `apids`.
///
/// Every byte equal to one of the APIDs is taken as the second byte of a header. Candidates
/// passing [check_valid] in sband mode are sliced like a first fragment. This is far less
/// precise than decoding framed data and is only meant for captures where framing failed.
#[must_use]
pub fn find_ccsds_packets(buf: &[u8], apids: &[Apid], offsets: &SegmentOffsets) -> Vec<Packet> {
    let mut packets = Vec::new();
    let mut idx = 1;
    while idx < buf.len() {
        if !apids.contains(&Apid::from(buf[idx])) {
            idx += 1;
            continue;
        }
        let start = idx - 1;
        let header = match PacketHeader::decode_at(buf, start) {
            Ok(header) if check_valid(&header, true) => header,
            _ => {
                idx += 1;
                continue;
            }
        };
        let data = offsets.first_slice(&header, &buf[start..]);
        trace!(offset = start, apid = header.apid, len = data.len(), "found packet");
        packets.push(Packet {
            header,
            data: data.to_vec(),
            complete: true,
        });
        idx = (start + data.len()).max(idx) + 1;
    }
    if packets.is_empty() {
        warn!(?apids, "no packets found searching raw data");
    }
    packets
}
