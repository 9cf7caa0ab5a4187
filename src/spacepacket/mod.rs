//! CCSDS space packets as flown by the missions this crate decodes.
//!
//! The primary header follows the CCSDS layout except that only the low byte of the APID
//! is meaningful, and packets with a secondary header carry a fixed 6 byte time field:
//! 4 bytes of whole seconds, a subseconds byte and a reserved byte.
mod demux;
mod reassemble;

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::bits::extract_uint;
use crate::prelude::*;

pub use demux::{
    find_ccsds_packets, ApidDemultiplexer, Demuxed, PacketBucket, DEFAULT_WRAPPER_APID,
    DEFAULT_WRAPPER_LEN,
};
pub use reassemble::{parse_fragments, Fragments, Reassembled, Reassembler, SegmentOffsets};

pub type Apid = u16;

/// Packet is a continuation of a segmented packet.
pub const SEQ_CONTINUATION: u8 = 0;
/// Packet is the first of a segmented packet.
pub const SEQ_FIRST: u8 = 1;
/// Packet is the last of a segmented packet.
pub const SEQ_LAST: u8 = 2;
/// Packet is not segmented.
pub const SEQ_UNSEGMENTED: u8 = 3;

/// Packet primary header, plus the time fields of the secondary header when present.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub type_flag: u8,
    pub has_secondary_header: bool,
    /// The 3 bits between the secondary header flag and the APID byte. Always zero for the
    /// missions supported.
    pub apid_msb: u8,
    pub apid: Apid,
    pub sequence_flags: u8,
    pub sequence_id: u16,
    /// Length of the packet data field minus 1.
    pub len_minus1: u16,
    /// Whole seconds since the mission epoch, if there is a secondary header.
    pub seconds: Option<u32>,
    pub subseconds: Option<u8>,
    pub reserved: Option<u8>,
}

impl PacketHeader {
    /// Primary header length in bytes
    pub const LEN: usize = 6;
    /// Primary plus secondary header length in bytes
    pub const LEN_WITH_SECONDARY: usize = 12;
    /// Maximum sequence id before rollover
    pub const SEQ_MAX: u16 = 16383;

    /// Decode a header from the start of `dat`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if there are fewer than 6 bytes, or fewer than 12 when the
    /// secondary header flag is set.
    pub fn decode(dat: &[u8]) -> Result<Self> {
        Self::decode_at(dat, 0)
    }

    /// Decode a header starting at `offset` in `dat`.
    ///
    /// # Errors
    /// See [PacketHeader::decode].
    pub fn decode_at(dat: &[u8], offset: usize) -> Result<Self> {
        let not_enough = |minimum: usize| Error::NotEnoughData {
            actual: dat.len().saturating_sub(offset),
            minimum,
        };
        let buf = dat
            .get(offset..)
            .filter(|b| b.len() >= Self::LEN)
            .ok_or_else(|| not_enough(Self::LEN))?;

        let has_secondary_header = extract_uint(buf, 4, 1)? == 1;
        let mut header = PacketHeader {
            version: extract_uint(buf, 0, 3)? as u8,
            type_flag: extract_uint(buf, 3, 1)? as u8,
            has_secondary_header,
            apid_msb: extract_uint(buf, 5, 3)? as u8,
            apid: Apid::from(buf[1]),
            sequence_flags: extract_uint(buf, 16, 2)? as u8,
            sequence_id: extract_uint(buf, 18, 14)? as u16,
            len_minus1: u16::from_be_bytes([buf[4], buf[5]]),
            seconds: None,
            subseconds: None,
            reserved: None,
        };
        if has_secondary_header {
            if buf.len() < Self::LEN_WITH_SECONDARY {
                return Err(not_enough(Self::LEN_WITH_SECONDARY));
            }
            header.seconds = Some(u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]));
            header.subseconds = Some(buf[10]);
            header.reserved = Some(buf[11]);
        }
        Ok(header)
    }

    /// Number of header bytes, 6 or 12.
    #[must_use]
    pub fn header_len(&self) -> usize {
        if self.has_secondary_header {
            Self::LEN_WITH_SECONDARY
        } else {
            Self::LEN
        }
    }

    #[must_use]
    pub fn is_first(&self) -> bool {
        self.sequence_flags == SEQ_FIRST
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.sequence_flags == SEQ_LAST
    }

    #[must_use]
    pub fn is_cont(&self) -> bool {
        self.sequence_flags == SEQ_CONTINUATION
    }

    #[must_use]
    pub fn is_standalone(&self) -> bool {
        self.sequence_flags == SEQ_UNSEGMENTED
    }
}

const MIN_PLAUSIBLE_LEN: u16 = 50;
const MAX_PLAUSIBLE_LEN: u16 = 1800;
const MAX_SUBSECONDS: u8 = 4;
const MIN_PLAUSIBLE_SECONDS: u64 = 500_000_000;
const MAX_PLAUSIBLE_SECONDS: u64 = 9_000_000_000;

/// Heuristic plausibility check used when syncing onto packet boundaries blindly.
///
/// With `sband` only unsegmented packets are accepted. A header without the time fields of
/// the secondary header is never plausible.
#[must_use]
pub fn check_valid(header: &PacketHeader, sband: bool) -> bool {
    if header.version != 0 || header.type_flag != 0 {
        return false;
    }
    if !(MIN_PLAUSIBLE_LEN..=MAX_PLAUSIBLE_LEN).contains(&header.len_minus1) {
        return false;
    }
    if sband && header.sequence_flags != SEQ_UNSEGMENTED {
        return false;
    }
    if header.reserved != Some(0) {
        return false;
    }
    if !header.subseconds.is_some_and(|s| s <= MAX_SUBSECONDS) {
        return false;
    }
    if header.has_secondary_header {
        return header.seconds.is_some_and(|s| {
            (MIN_PLAUSIBLE_SECONDS..=MAX_PLAUSIBLE_SECONDS).contains(&u64::from(s))
        });
    }
    true
}

/// Number of packets missing between `cur` and `last`, accounting for sequence id
/// rollover.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    let expected = if last + 1 > PacketHeader::SEQ_MAX {
        0
    } else {
        last + 1
    };
    if cur != expected {
        if last + 1 > cur {
            return cur + PacketHeader::SEQ_MAX - last;
        }
        return cur - last - 1;
    }
    0
}

/// A single physical packet unit, before reassembly.
#[derive(Debug, Clone, Copy)]
pub struct PacketFragment<'a> {
    pub header: PacketHeader,
    /// All fragment bytes, starting with the header.
    pub data: &'a [u8],
    /// Index of the frame this fragment was parsed from.
    pub index: usize,
}

/// A reassembled packet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Header of the first fragment
    pub header: PacketHeader,
    /// All packet bytes, including the header
    pub data: Vec<u8>,
    /// False if the packet started but its last segment never arrived.
    pub complete: bool,
}

impl Packet {
    /// Decode the header from `dat` and take ownership of all of `dat` as packet data.
    ///
    /// # Errors
    /// If the header cannot be decoded.
    pub fn decode(dat: Vec<u8>) -> Result<Self> {
        let header = PacketHeader::decode(&dat)?;
        Ok(Packet {
            header,
            data: dat,
            complete: true,
        })
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet{{apid={}, seq={}, flags={}, len={}, complete={}}}",
            self.header.apid,
            self.header.sequence_id,
            self.header.sequence_flags,
            self.data.len(),
            self.complete
        )
    }
}
