use tracing::{debug, trace};

use super::synchronizer::Synchronizer;

/// Bytes occupied by the sync marker plus the AX.25 address and control fields in the
/// captures this crate was built for.
pub const DEFAULT_AX25_HEADER_LEN: usize = 16;

/// Remove the first `header_length` bytes of `frame`.
///
/// A frame too short to contain the header yields an empty slice.
#[must_use]
pub fn strip_header(frame: &[u8], header_length: usize) -> &[u8] {
    match frame.get(header_length..) {
        Some(payload) => payload,
        None => {
            debug!(
                len = frame.len(),
                header_length, "frame shorter than link header, dropping"
            );
            &[]
        }
    }
}

/// Result of deframing a capture.
#[derive(Debug, Clone, Default)]
pub struct Deframed {
    /// Frame payloads with the link header removed, in capture order.
    pub frames: Vec<Vec<u8>>,
    /// Candidate frames found by the synchronizer.
    pub found: usize,
    /// Candidate frames dropped because they were shorter than the header.
    pub short: usize,
}

/// Locates AX.25 frames by sync marker and strips their link header.
///
/// `header_length` is counted from the first byte of the sync marker.
#[derive(Debug, Clone)]
pub struct Ax25Deframer {
    sync: Synchronizer,
    header_length: usize,
}

impl Ax25Deframer {
    #[must_use]
    pub fn new(sync: Synchronizer, header_length: usize) -> Self {
        Ax25Deframer {
            sync,
            header_length,
        }
    }

    #[must_use]
    pub fn header_length(&self) -> usize {
        self.header_length
    }

    pub fn deframe(&self, buf: &[u8]) -> Deframed {
        let candidates = self.sync.candidates(buf);
        let mut zult = Deframed {
            found: candidates.len(),
            ..Default::default()
        };
        for candidate in &candidates {
            if candidate.len() < self.header_length {
                debug!(
                    offset = candidate.start,
                    len = candidate.len(),
                    "frame shorter than link header, dropping"
                );
                zult.short += 1;
                continue;
            }
            let payload = strip_header(candidate.slice(buf), self.header_length);
            zult.frames.push(payload.to_vec());
        }
        trace!(
            found = zult.found,
            short = zult.short,
            "deframed ax.25 capture"
        );
        zult
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_header_removes_prefix() {
        let frame: Vec<u8> = (0..20).collect();
        assert_eq!(strip_header(&frame, 16), &[16, 17, 18, 19]);
        assert!(strip_header(&frame, 20).is_empty());
    }

    #[test]
    fn strip_header_short_frame_is_empty() {
        assert!(strip_header(&[1, 2, 3], 16).is_empty());
    }

    #[test]
    fn deframe_drops_short_frames() {
        let sync = [0x7e, 0x7e];
        let mut buf = vec![];
        buf.extend_from_slice(&sync);
        buf.extend_from_slice(&[0xaa; 6]);
        buf.extend_from_slice(&sync);
        buf.extend_from_slice(&[0xbb]);
        buf.extend_from_slice(&sync);

        let deframer = Ax25Deframer::new(Synchronizer::new(&sync), 4);
        let zult = deframer.deframe(&buf);
        assert_eq!(zult.found, 2);
        assert_eq!(zult.short, 1);
        assert_eq!(zult.frames, vec![vec![0xaa; 4]]);
    }

    #[test]
    fn deframe_keeps_header_only_frames() {
        let sync = [0x7e, 0x7e];
        let mut buf = vec![];
        buf.extend_from_slice(&sync);
        buf.extend_from_slice(&[0xaa; 2]);
        buf.extend_from_slice(&sync);

        let zult = Ax25Deframer::new(Synchronizer::new(&sync), 4).deframe(&buf);
        assert_eq!(zult.found, 1);
        assert_eq!(zult.short, 0);
        assert_eq!(zult.frames, vec![Vec::<u8>::new()]);
    }
}
