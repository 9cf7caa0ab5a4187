use super::definitions::{DataType, Endian, PointDefinition};
use crate::prelude::*;

/// Binary layout a point is read with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackFormat {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Fixed length byte string
    Chars(usize),
}

/// A value as read from packet bytes, before calibration.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Chars(Vec<u8>),
}

impl RawValue {
    /// Numeric value, or `None` for byte strings.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Unsigned(v) => Some(*v as f64),
            RawValue::Signed(v) => Some(*v as f64),
            RawValue::Float(v) => Some(*v),
            RawValue::Chars(_) => None,
        }
    }
}

macro_rules! read {
    ($ty:ty, $bytes:expr, $endian:expr) => {{
        let arr = $bytes.get(..std::mem::size_of::<$ty>())?.try_into().ok()?;
        match $endian {
            Endian::Big => <$ty>::from_be_bytes(arr),
            Endian::Little => <$ty>::from_le_bytes(arr),
        }
    }};
}

impl UnpackFormat {
    /// Format for a data type and width, `None` if there is no such format.
    ///
    /// Widths below 8 bits read the whole containing byte. Unless `strict_float` is set
    /// floating point points are always read as 8 byte doubles, whatever their declared
    /// width.
    #[must_use]
    pub fn lookup(dtype: DataType, size_bits: u32, strict_float: bool) -> Option<Self> {
        if dtype == DataType::Char {
            return (size_bits >= 8 && size_bits % 8 == 0)
                .then(|| UnpackFormat::Chars(size_bits as usize / 8));
        }
        let width = match size_bits {
            1..=8 => 8,
            16 | 32 | 64 => size_bits,
            _ => return None,
        };
        let format = match (dtype, width) {
            (DataType::Unsigned, 8) => UnpackFormat::U8,
            (DataType::Unsigned, 16) => UnpackFormat::U16,
            (DataType::Unsigned, 32) => UnpackFormat::U32,
            (DataType::Unsigned, _) => UnpackFormat::U64,
            (DataType::Signed, 8) => UnpackFormat::I8,
            (DataType::Signed, 16) => UnpackFormat::I16,
            (DataType::Signed, 32) => UnpackFormat::I32,
            (DataType::Signed, _) => UnpackFormat::I64,
            (DataType::Float | DataType::Double, _) if size_bits < 8 => return None,
            (DataType::Float | DataType::Double, 32) if strict_float => UnpackFormat::F32,
            (DataType::Float | DataType::Double, 64) => UnpackFormat::F64,
            (DataType::Float | DataType::Double, _) if strict_float => return None,
            (DataType::Float | DataType::Double, _) => UnpackFormat::F64,
            (DataType::Char, _) => return None,
        };
        Some(format)
    }

    /// Format for `point`.
    ///
    /// # Errors
    /// [Error::UnpackFormat] if the point's data type and width have no format.
    pub fn for_point(point: &PointDefinition, strict_float: bool) -> Result<Self> {
        Self::lookup(point.dtype, point.size_bits, strict_float).ok_or_else(|| {
            Error::UnpackFormat {
                point: point.name.clone(),
                dtype: point.dtype.to_string(),
                size_bits: point.size_bits,
            }
        })
    }

    /// Number of bytes read.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            UnpackFormat::U8 | UnpackFormat::I8 => 1,
            UnpackFormat::U16 | UnpackFormat::I16 => 2,
            UnpackFormat::U32 | UnpackFormat::I32 | UnpackFormat::F32 => 4,
            UnpackFormat::U64 | UnpackFormat::I64 | UnpackFormat::F64 => 8,
            UnpackFormat::Chars(n) => *n,
        }
    }

    /// Read a value from the start of `bytes`, or `None` if there are fewer than
    /// [size](UnpackFormat::size) bytes.
    #[must_use]
    pub fn unpack(&self, bytes: &[u8], endian: Endian) -> Option<RawValue> {
        let value = match self {
            UnpackFormat::U8 => RawValue::Unsigned(u64::from(read!(u8, bytes, endian))),
            UnpackFormat::U16 => RawValue::Unsigned(u64::from(read!(u16, bytes, endian))),
            UnpackFormat::U32 => RawValue::Unsigned(u64::from(read!(u32, bytes, endian))),
            UnpackFormat::U64 => RawValue::Unsigned(read!(u64, bytes, endian)),
            UnpackFormat::I8 => RawValue::Signed(i64::from(read!(i8, bytes, endian))),
            UnpackFormat::I16 => RawValue::Signed(i64::from(read!(i16, bytes, endian))),
            UnpackFormat::I32 => RawValue::Signed(i64::from(read!(i32, bytes, endian))),
            UnpackFormat::I64 => RawValue::Signed(read!(i64, bytes, endian)),
            UnpackFormat::F32 => RawValue::Float(f64::from(read!(f32, bytes, endian))),
            UnpackFormat::F64 => RawValue::Float(read!(f64, bytes, endian)),
            UnpackFormat::Chars(n) => RawValue::Chars(bytes.get(..*n)?.to_vec()),
        };
        Some(value)
    }
}
