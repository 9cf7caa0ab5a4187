use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{Packet, PacketFragment, PacketHeader, SEQ_FIRST, SEQ_LAST, SEQ_UNSEGMENTED};

/// Byte offsets applied when slicing fragments for reassembly.
///
/// A first (or unsegmented) fragment contributes bytes
/// `[0, len_minus1 + header_len + first)` and every later fragment contributes
/// `[header_len, len_minus1 + header_len + segment)`. The defaults are the values used on
/// the flown missions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentOffsets {
    #[serde(default = "default_first")]
    pub first: i64,
    #[serde(default = "default_segment")]
    pub segment: i64,
}

fn default_first() -> i64 {
    -5
}

fn default_segment() -> i64 {
    1
}

impl Default for SegmentOffsets {
    fn default() -> Self {
        SegmentOffsets {
            first: default_first(),
            segment: default_segment(),
        }
    }
}

fn offset_end(header: &PacketHeader, offset: i64) -> usize {
    let end = i64::from(header.len_minus1) + header.header_len() as i64 + offset;
    usize::try_from(end).unwrap_or(0)
}

impl SegmentOffsets {
    /// Bytes of a first or unsegmented fragment that belong to the packet.
    #[must_use]
    pub fn first_slice<'a>(&self, header: &PacketHeader, data: &'a [u8]) -> &'a [u8] {
        let end = offset_end(header, self.first).min(data.len());
        &data[..end]
    }

    /// Bytes of a continuation or last fragment that belong to the packet.
    #[must_use]
    pub fn segment_slice<'a>(&self, header: &PacketHeader, data: &'a [u8]) -> &'a [u8] {
        let start = header.header_len().min(data.len());
        let end = offset_end(header, self.segment).min(data.len()).max(start);
        &data[start..end]
    }
}

/// Fragments parsed from a sequence of frames.
#[derive(Debug, Default)]
pub struct Fragments<'a> {
    pub fragments: Vec<PacketFragment<'a>>,
    /// Frames whose header could not be decoded.
    pub skipped: usize,
}

/// Parse a header at the start of every frame. Frames whose header cannot be decoded are
/// skipped and counted.
pub fn parse_fragments(frames: &[Vec<u8>]) -> Fragments<'_> {
    let mut zult = Fragments::default();
    for (index, data) in frames.iter().enumerate() {
        match PacketHeader::decode(data) {
            Ok(header) => zult.fragments.push(PacketFragment {
                header,
                data,
                index,
            }),
            Err(err) => {
                debug!(index, len = data.len(), "skipping fragment: {err}");
                zult.skipped += 1;
            }
        }
    }
    zult
}

/// Output of [Reassembler::reassemble].
#[derive(Debug, Default)]
pub struct Reassembled {
    /// Packets in the order their first fragment arrived.
    pub packets: Vec<Packet>,
    /// Packets emitted without their last segment.
    pub partial: usize,
    /// Continuation or last segments with no open packet for their sequence id.
    pub orphaned: usize,
    /// Repeated starts or segments for packets that were already terminated.
    pub duplicates: usize,
}

struct Slot {
    packet: Packet,
    fragments: usize,
}

/// Stitches segmented packets back together by sequence id.
///
/// Every sequence id identifies one logical packet; the sequence flags of its fragments
/// give their position. Unsegmented packets are emitted as they are found.
#[derive(Debug, Clone, Default)]
pub struct Reassembler {
    offsets: SegmentOffsets,
}

impl Reassembler {
    #[must_use]
    pub fn new(offsets: SegmentOffsets) -> Self {
        Reassembler { offsets }
    }

    #[must_use]
    pub fn offsets(&self) -> SegmentOffsets {
        self.offsets
    }

    #[must_use]
    pub fn reassemble(&self, fragments: &[PacketFragment]) -> Reassembled {
        let mut zult = Reassembled::default();
        let mut slots: Vec<Slot> = Vec::new();
        // sequence id to index of its open/closed slot
        let mut started: HashMap<u16, usize> = HashMap::new();

        for frag in fragments {
            let header = &frag.header;
            let seq = header.sequence_id;
            match header.sequence_flags {
                SEQ_UNSEGMENTED => {
                    slots.push(Slot {
                        packet: Packet {
                            header: *header,
                            data: self.offsets.first_slice(header, frag.data).to_vec(),
                            complete: true,
                        },
                        fragments: 1,
                    });
                }
                SEQ_FIRST => {
                    if started.contains_key(&seq) {
                        debug!(
                            apid = header.apid,
                            seq,
                            index = frag.index,
                            "multiple packet starts for sequence id, using the first"
                        );
                        zult.duplicates += 1;
                        continue;
                    }
                    started.insert(seq, slots.len());
                    slots.push(Slot {
                        packet: Packet {
                            header: *header,
                            data: self.offsets.first_slice(header, frag.data).to_vec(),
                            complete: false,
                        },
                        fragments: 1,
                    });
                }
                flags => {
                    let Some(slot) = started.get(&seq).map(|idx| &mut slots[*idx]) else {
                        debug!(
                            apid = header.apid,
                            seq,
                            index = frag.index,
                            "segment without packet start, dropping"
                        );
                        zult.orphaned += 1;
                        continue;
                    };
                    if slot.packet.complete {
                        debug!(
                            apid = header.apid,
                            seq,
                            index = frag.index,
                            "segment for already terminated packet, dropping"
                        );
                        zult.duplicates += 1;
                        continue;
                    }
                    slot.packet
                        .data
                        .extend_from_slice(self.offsets.segment_slice(header, frag.data));
                    slot.fragments += 1;
                    if flags == SEQ_LAST {
                        slot.packet.complete = true;
                    }
                }
            }
        }

        for slot in slots {
            if !slot.packet.complete {
                debug!(
                    apid = slot.packet.header.apid,
                    seq = slot.packet.header.sequence_id,
                    fragments = slot.fragments,
                    "no end of packet found, emitting partial packet"
                );
                zult.partial += 1;
            }
            trace!(packet = %slot.packet, fragments = slot.fragments, "reassembled");
            zult.packets.push(slot.packet);
        }
        zult
    }
}
