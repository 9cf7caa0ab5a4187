//! Link-layer framing.
//!
//! Captures arrive either as a stream of AX.25 frames, each preceded by a fixed sync
//! marker, or as a stream of fixed-size VCDU transfer frames. The types here turn a raw
//! capture into candidate frames and frames into the bytes of the CCSDS packets they
//! carry.
mod ax25;
pub mod kiss;
mod synchronizer;
mod vcdu;

pub use ax25::{strip_header, Ax25Deframer, Deframed, DEFAULT_AX25_HEADER_LEN};
pub use synchronizer::{CandidateFrame, Synchronizer};
pub use vcdu::{
    VcduDemultiplexer, VcduHeader, VcduOpts, VcduOutput, FHP_IDLE, FHP_NO_HEADER,
    VCDU_PACKET_OVERHEAD,
};

/// Spacecraft identifier carried in a VCDU header.
pub type Scid = u16;
/// Virtual channel identifier carried in a VCDU header.
pub type Vcid = u8;
