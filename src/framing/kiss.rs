//! KISS byte stuffing.
//!
//! KISS reserves [FEND] as a frame delimiter, so occurrences of it (and of the escape byte
//! itself) inside frame data are transmitted as two byte escape sequences.
use tracing::trace;

/// Frame end.
pub const FEND: u8 = 0xc0;
/// Frame escape.
pub const FESC: u8 = 0xdb;
/// Transposed frame end.
pub const TFEND: u8 = 0xdc;
/// Transposed frame escape.
pub const TFESC: u8 = 0xdd;

/// Frame bytes with KISS escapes reversed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unstuffed {
    pub data: Vec<u8>,
    /// Escape bytes not followed by [TFEND] or [TFESC]. These are passed through as-is.
    pub malformed: usize,
}

/// Reverse KISS escaping.
///
/// `FESC TFEND` becomes [FEND] and `FESC TFESC` becomes [FESC]. Any other byte following
/// [FESC], including end of data, leaves the escape byte in the output untouched.
///
/// # Example
/// ```
/// use cubeds::framing::kiss;
///
/// let zult = kiss::unstuff(&[0x01, 0xdb, 0xdc, 0xdb, 0xdd, 0x02]);
/// assert_eq!(zult.data, vec![0x01, 0xc0, 0xdb, 0x02]);
/// assert_eq!(zult.malformed, 0);
/// ```
#[must_use]
pub fn unstuff(frame: &[u8]) -> Unstuffed {
    let mut data = Vec::with_capacity(frame.len());
    let mut malformed = 0;
    let mut idx = 0;
    while idx < frame.len() {
        let b = frame[idx];
        if b != FESC {
            data.push(b);
            idx += 1;
            continue;
        }
        match frame.get(idx + 1) {
            Some(&TFEND) => {
                data.push(FEND);
                idx += 2;
            }
            Some(&TFESC) => {
                data.push(FESC);
                idx += 2;
            }
            next => {
                trace!(offset = idx, next = ?next, "malformed kiss escape");
                malformed += 1;
                data.push(b);
                idx += 1;
            }
        }
    }
    Unstuffed { data, malformed }
}

/// Apply KISS escaping to `data`.
#[must_use]
pub fn stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8);
    for &b in data {
        match b {
            FEND => out.extend_from_slice(&[FESC, TFEND]),
            FESC => out.extend_from_slice(&[FESC, TFESC]),
            _ => out.push(b),
        }
    }
    out
}
