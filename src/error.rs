#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Not enough bytes to decode a header or field.
    #[error("Not enough bytes; got {actual}, need at least {minimum}")]
    NotEnoughData { actual: usize, minimum: usize },

    /// A bit window reached past the end of the available bits.
    #[error("bit range {start}+{len} exceeds {available} available bits")]
    BitRange {
        start: usize,
        len: usize,
        available: usize,
    },

    /// A point's data type and width cannot be mapped to a binary format.
    #[error("cannot unpack point {point}: unsupported dtype {dtype} with {size_bits} bits")]
    UnpackFormat {
        point: String,
        dtype: String,
        size_bits: u32,
    },

    /// Packet or point definitions are inconsistent.
    #[error("invalid definition: {0}")]
    Definition(String),

    #[error("invalid config: {0}")]
    Config(String),

    /// A pipeline stage was handed data it cannot decode.
    #[error("stage {stage} expects {expected} input, got {actual}")]
    StageInput {
        stage: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Regex(#[from] regex::Error),
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}

pub type Result<T> = std::result::Result<T, Error>;
