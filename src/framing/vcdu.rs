use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use super::{Scid, Vcid};
use crate::bits::extract_uint;
use crate::prelude::*;
use crate::spacepacket::{check_valid, missing_packets, PacketHeader};

/// First header pointer value indicating no packet starts in this frame.
pub const FHP_NO_HEADER: u16 = 0x7ff;
/// First header pointer value indicating the frame holds only idle data.
pub const FHP_IDLE: u16 = 0x7fe;
/// Bytes occupied by an embedded packet in addition to its `len_minus1`.
pub const VCDU_PACKET_OVERHEAD: usize = 12;

/// VCDU transfer frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcduHeader {
    pub version: u8,
    pub scid: Scid,
    pub vcid: Vcid,
    pub master_frame_count: u8,
    pub vc_frame_count: u8,
    pub secondary_header: bool,
    pub sync_flag: bool,
    pub frame_order: bool,
    pub segment_length_id: u8,
    /// Offset of the first packet header in the frame data field.
    pub first_header_pointer: u16,
    /// The last 2 bytes of the frame.
    pub trailer: [u8; 2],
}

impl VcduHeader {
    /// VCDU header length in bytes
    pub const LEN: usize = 6;
    /// Trailer length in bytes
    pub const TRAILER_LEN: usize = 2;

    /// Decode the header and trailer of `frame`, or `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() < Self::LEN + Self::TRAILER_LEN {
            return None;
        }
        let field = |start: usize, len: usize| extract_uint(frame, start, len).ok();
        Some(VcduHeader {
            version: field(0, 2)? as u8,
            scid: field(2, 10)? as Scid,
            vcid: field(12, 3)? as Vcid,
            master_frame_count: frame[2],
            vc_frame_count: frame[3],
            secondary_header: field(32, 1)? == 1,
            sync_flag: field(33, 1)? == 1,
            frame_order: field(34, 1)? == 1,
            segment_length_id: field(35, 2)? as u8,
            first_header_pointer: field(37, 11)? as u16,
            trailer: [frame[frame.len() - 2], frame[frame.len() - 1]],
        })
    }

    #[must_use]
    pub fn has_header(&self) -> bool {
        self.first_header_pointer != FHP_NO_HEADER
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.first_header_pointer == FHP_IDLE
    }
}

fn default_header_length() -> usize {
    VcduHeader::LEN
}

fn default_scid() -> Scid {
    1
}

/// Options for [VcduDemultiplexer].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct VcduOpts {
    /// Total frame length in bytes, including header and trailer.
    pub frame_size: usize,
    /// Offset of the frame data field, which the first header pointer is relative to.
    #[builder(default = VcduHeader::LEN)]
    #[serde(default = "default_header_length")]
    pub header_length: usize,
    /// Frames for other spacecraft are dropped.
    #[builder(default = default_scid())]
    #[serde(default = "default_scid")]
    pub spacecraft_id: Scid,
    /// Frames for other virtual channels are dropped.
    #[builder(default)]
    #[serde(default)]
    pub virtual_channel_id: Vcid,
}

/// Output of [VcduDemultiplexer::demux].
#[derive(Debug, Clone, Default)]
pub struct VcduOutput {
    /// Bytes of every embedded packet, in frame order.
    pub packets: Vec<Vec<u8>>,
    /// Headers of all frames, valid or not.
    pub headers: Vec<VcduHeader>,
    /// Frames rejected by header validation.
    pub rejected: usize,
    /// Valid frames in which no plausible packet was found.
    pub empty: usize,
    /// Times the VC frame count did not follow the previous frame.
    pub discontinuities: usize,
    /// Packets missing according to the packet sequence ids.
    pub missing_packets: usize,
}

/// Splits a capture of fixed size VCDU frames and extracts the packets they carry.
#[derive(Debug, Clone)]
pub struct VcduDemultiplexer {
    opts: VcduOpts,
}

impl VcduDemultiplexer {
    /// # Errors
    /// [Error::Config] if `frame_size` cannot hold a header and trailer.
    pub fn new(opts: VcduOpts) -> Result<Self> {
        let minimum = opts.header_length.max(VcduHeader::LEN) + VcduHeader::TRAILER_LEN;
        if opts.frame_size < minimum {
            return Err(Error::Config(format!(
                "vcdu frame_size {} must be at least {minimum}",
                opts.frame_size
            )));
        }
        Ok(VcduDemultiplexer { opts })
    }

    #[must_use]
    pub fn opts(&self) -> &VcduOpts {
        &self.opts
    }

    /// True if the frame is for the configured spacecraft and virtual channel and carries
    /// none of the unsupported header options.
    #[must_use]
    pub fn valid(&self, header: &VcduHeader) -> bool {
        header.version == 0
            && header.scid == self.opts.spacecraft_id
            && header.vcid == self.opts.virtual_channel_id
            && !header.secondary_header
            && !header.sync_flag
            && !header.frame_order
    }

    /// Extract packets from every whole frame in `buf`. A trailing partial frame is ignored.
    #[must_use]
    pub fn demux(&self, buf: &[u8]) -> VcduOutput {
        let mut zult = VcduOutput::default();
        let mut last_count: Option<u8> = None;
        let mut last_seq: Option<u16> = None;

        for (idx, frame) in buf.chunks_exact(self.opts.frame_size).enumerate() {
            let Some(header) = VcduHeader::decode(frame) else {
                zult.rejected += 1;
                continue;
            };
            zult.headers.push(header);

            if let Some(last) = last_count {
                if header.vc_frame_count != last.wrapping_add(1) {
                    debug!(
                        frame = idx,
                        last,
                        cur = header.vc_frame_count,
                        "vc frame count discontinuity"
                    );
                    zult.discontinuities += 1;
                }
            }
            last_count = Some(header.vc_frame_count);

            if !self.valid(&header) {
                debug!(frame = idx, ?header, "invalid vcdu header, dropping frame");
                zult.rejected += 1;
                continue;
            }
            if !header.has_header() || header.is_idle() {
                trace!(
                    frame = idx,
                    fhp = header.first_header_pointer,
                    "no packet starts in frame"
                );
                continue;
            }

            let mut offset = self.opts.header_length + header.first_header_pointer as usize;
            let mut packet_header = match PacketHeader::decode_at(frame, offset) {
                Ok(h) if check_valid(&h, true) => h,
                _ => {
                    debug!(frame = idx, offset, "no valid packet at first header pointer");
                    zult.empty += 1;
                    continue;
                }
            };
            loop {
                let need = packet_header.len_minus1 as usize + VCDU_PACKET_OVERHEAD;
                if offset + need >= frame.len() {
                    trace!(frame = idx, offset, need, "packet overruns frame");
                    break;
                }
                zult.packets.push(frame[offset..offset + need].to_vec());
                if let Some(last) = last_seq {
                    let missing = missing_packets(packet_header.sequence_id, last);
                    if missing > 0 {
                        debug!(
                            apid = packet_header.apid,
                            seq = packet_header.sequence_id,
                            last,
                            missing,
                            "packet sequence gap"
                        );
                        zult.missing_packets += missing as usize;
                    }
                }
                last_seq = Some(packet_header.sequence_id);

                offset += need;
                packet_header = match PacketHeader::decode_at(frame, offset) {
                    Ok(h) => h,
                    Err(err) => {
                        trace!(frame = idx, offset, "end of frame packets: {err}");
                        break;
                    }
                };
            }
        }
        trace!(
            frames = zult.headers.len(),
            packets = zult.packets.len(),
            "vcdu demux complete"
        );
        zult
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_SIZE: usize = 256;

    fn frame_header(scid: u16, vcid: u8, count: u8, fhp: u16) -> [u8; 6] {
        let id = (scid << 4) | (u16::from(vcid) << 1);
        let [b0, b1] = id.to_be_bytes();
        let [b4, b5] = fhp.to_be_bytes();
        [b0, b1, 0x00, count, b4, b5]
    }

    fn packet(seq: u16, len_minus1: u16) -> Vec<u8> {
        let mut dat = vec![0x55; len_minus1 as usize + VCDU_PACKET_OVERHEAD];
        dat[0] = 0x08;
        dat[1] = 0x05;
        dat[2..4].copy_from_slice(&(0xc000 | seq).to_be_bytes());
        dat[4..6].copy_from_slice(&len_minus1.to_be_bytes());
        dat[6..10].copy_from_slice(&600_000_000u32.to_be_bytes());
        dat[10] = 0;
        dat[11] = 0;
        dat
    }

    fn frame(header: [u8; 6], fhp_fill: usize, packets: &[Vec<u8>]) -> Vec<u8> {
        let mut dat = header.to_vec();
        dat.extend(std::iter::repeat(0xee).take(fhp_fill));
        for p in packets {
            dat.extend_from_slice(p);
        }
        dat.resize(FRAME_SIZE, 0xff);
        dat
    }

    fn demuxer() -> VcduDemultiplexer {
        VcduDemultiplexer::new(VcduOpts::builder().frame_size(FRAME_SIZE).build()).unwrap()
    }

    #[test]
    fn decode_header() {
        let mut dat = frame(frame_header(0x2a5, 3, 17, 0x123), 0, &[]);
        dat[2] = 0x42;
        dat[4] |= 0b1011_0000;
        dat[FRAME_SIZE - 2] = 0xca;
        dat[FRAME_SIZE - 1] = 0xfe;

        let header = VcduHeader::decode(&dat).unwrap();

        assert_eq!(header.version, 0);
        assert_eq!(header.scid, 0x2a5);
        assert_eq!(header.vcid, 3);
        assert_eq!(header.master_frame_count, 0x42);
        assert_eq!(header.vc_frame_count, 17);
        assert!(header.secondary_header);
        assert!(!header.sync_flag);
        assert!(header.frame_order);
        assert_eq!(header.segment_length_id, 0b10);
        assert_eq!(header.first_header_pointer, 0x123);
        assert_eq!(header.trailer, [0xca, 0xfe]);
        assert!(VcduHeader::decode(&dat[..7]).is_none());
    }

    #[test]
    fn demux_extracts_packets_across_frames() {
        let mut buf = frame(frame_header(1, 0, 0, 0), 0, &[packet(1, 60), packet(2, 60)]);
        buf.extend(frame(frame_header(1, 0, 1, 4), 4, &[packet(3, 100)]));
        // partial trailing frame is ignored
        buf.extend_from_slice(&[0x00; 10]);

        let zult = demuxer().demux(&buf);

        assert_eq!(zult.headers.len(), 2);
        assert_eq!(zult.packets.len(), 3);
        assert_eq!(zult.packets[0], packet(1, 60));
        assert_eq!(zult.packets[2], packet(3, 100));
        assert_eq!(zult.discontinuities, 0);
        assert_eq!(zult.missing_packets, 0);
        assert_eq!(zult.rejected, 0);
    }

    #[test]
    fn demux_rejects_other_spacecraft() {
        let mut buf = frame(frame_header(2, 0, 0, 0), 0, &[packet(1, 60)]);
        buf.extend(frame(frame_header(1, 1, 1, 0), 0, &[packet(2, 60)]));
        buf.extend(frame(frame_header(1, 0, 2, 0), 0, &[packet(3, 60)]));

        let zult = demuxer().demux(&buf);

        assert_eq!(zult.rejected, 2);
        assert_eq!(zult.packets, vec![packet(3, 60)]);
        // only the packets of accepted frames count toward the sequence
        assert_eq!(zult.missing_packets, 0);
    }

    #[test]
    fn demux_counts_discontinuities_and_gaps() {
        let mut buf = frame(frame_header(1, 0, 255, 0), 0, &[packet(1, 60)]);
        buf.extend(frame(frame_header(1, 0, 0, 0), 0, &[packet(2, 60)]));
        buf.extend(frame(frame_header(1, 0, 5, 0), 0, &[packet(6, 60)]));

        let zult = demuxer().demux(&buf);

        assert_eq!(zult.discontinuities, 1);
        assert_eq!(zult.missing_packets, 3);
        assert_eq!(zult.packets.len(), 3);
    }

    #[test]
    fn demux_skips_frames_without_packets() {
        let mut buf = frame(frame_header(1, 0, 0, FHP_NO_HEADER), 0, &[]);
        buf.extend(frame(frame_header(1, 0, 1, FHP_IDLE), 0, &[]));
        // first header pointer lands on garbage
        buf.extend(frame(frame_header(1, 0, 2, 0), 0, &[vec![0xff; 20]]));

        let zult = demuxer().demux(&buf);

        assert!(zult.packets.is_empty());
        assert_eq!(zult.empty, 1);
        assert_eq!(zult.rejected, 0);
    }

    #[test]
    fn demux_stops_at_packet_overrunning_frame() {
        let buf = frame(frame_header(1, 0, 0, 0), 0, &[packet(1, 60), packet(2, 200)]);
        let zult = demuxer().demux(&buf[..FRAME_SIZE]);
        assert_eq!(zult.packets, vec![packet(1, 60)]);
    }

    #[test]
    fn new_rejects_tiny_frames() {
        assert!(VcduDemultiplexer::new(VcduOpts::builder().frame_size(7).build()).is_err());
        assert!(VcduDemultiplexer::new(VcduOpts::builder().frame_size(8).build()).is_ok());
    }
}
