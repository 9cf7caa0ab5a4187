use tracing::trace;

use crate::prelude::*;

/// Location of a candidate frame within a capture buffer.
///
/// `start` is the offset of the sync marker and `end` is the offset of the next marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateFrame {
    pub start: usize,
    pub end: usize,
}

impl CandidateFrame {
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// The frame bytes, including the sync marker.
    #[must_use]
    pub fn slice<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.end]
    }
}

/// Scans an in-memory capture for a fixed, byte-aligned sync marker.
///
/// # Example
/// ```
/// use cubeds::framing::Synchronizer;
///
/// let sync = Synchronizer::new(&[0xaa, 0x55]);
/// let buf = [0x00, 0xaa, 0x55, 0x01, 0xaa, 0x55, 0x02];
/// assert_eq!(sync.scan(&buf), vec![1, 4]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synchronizer {
    pattern: Vec<u8>,
}

impl Synchronizer {
    #[must_use]
    pub fn new(pattern: &[u8]) -> Self {
        Synchronizer {
            pattern: pattern.to_vec(),
        }
    }

    /// Create from a hex encoded marker, e.g., `"86a24040"`.
    ///
    /// # Errors
    /// [Error::Hex] if `pattern` is not valid hex, [Error::Config] if it is empty.
    pub fn from_hex(pattern: &str) -> Result<Self> {
        let pattern = hex::decode(pattern)?;
        if pattern.is_empty() {
            return Err(Error::Config("sync marker cannot be empty".to_string()));
        }
        Ok(Synchronizer { pattern })
    }

    #[must_use]
    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    /// Every offset at which the marker begins, in ascending order.
    ///
    /// A marker ending exactly at the end of the buffer is reported. Matches may overlap.
    #[must_use]
    pub fn scan(&self, buf: &[u8]) -> Vec<usize> {
        if self.pattern.is_empty() || buf.len() < self.pattern.len() {
            return Vec::new();
        }
        let first = self.pattern[0];
        let last_start = buf.len() - self.pattern.len();
        let mut offsets = Vec::new();
        for idx in 0..=last_start {
            if buf[idx] == first && buf[idx..idx + self.pattern.len()] == self.pattern[..] {
                offsets.push(idx);
            }
        }
        trace!(count = offsets.len(), "sync scan complete");
        offsets
    }

    /// Candidate frames delimited by consecutive sync offsets.
    ///
    /// A frame spans from one marker to the next, so `n` markers produce `n - 1` frames. Data
    /// after the last marker has no known end and is not returned.
    #[must_use]
    pub fn candidates(&self, buf: &[u8]) -> Vec<CandidateFrame> {
        self.scan(buf)
            .windows(2)
            .map(|w| CandidateFrame {
                start: w[0],
                end: w[1],
            })
            .collect()
    }
}
