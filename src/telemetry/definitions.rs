use std::{collections::HashSet, fmt::Display, fs::File, io::Read, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::unpack::UnpackFormat;
use crate::prelude::*;
use crate::spacepacket::Apid;

/// Point data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[serde(alias = "dn")]
    Unsigned,
    #[serde(alias = "sn")]
    Signed,
    Char,
    Float,
    Double,
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dn" | "unsigned" => Ok(DataType::Unsigned),
            "sn" | "signed" => Ok(DataType::Signed),
            "char" => Ok(DataType::Char),
            "float" => Ok(DataType::Float),
            "double" => Ok(DataType::Double),
            other => Err(Error::Definition(format!("unknown data type {other:?}"))),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Unsigned => "dn",
            DataType::Signed => "sn",
            DataType::Char => "char",
            DataType::Float => "float",
            DataType::Double => "double",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Big,
    Little,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CalibrationRepr {
    Coefficients(Vec<f64>),
    Text(String),
}

/// Calibration polynomial, `c0 + c1*x + c2*x^2 + ...`.
///
/// Deserializes from either a list of coefficients or a colon separated string such as
/// `"0:1.5:0.01"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CalibrationRepr", into = "Vec<f64>")]
pub struct Calibration(Vec<f64>);

impl Calibration {
    #[must_use]
    pub fn new(coefficients: Vec<f64>) -> Self {
        Calibration(coefficients)
    }

    /// Zero intercept linear scale.
    #[must_use]
    pub fn scale(multiplier: f64) -> Self {
        Calibration(vec![0.0, multiplier])
    }

    #[must_use]
    pub fn coefficients(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn evaluate(&self, raw: f64) -> f64 {
        self.0.iter().rev().fold(0.0, |acc, c| acc * raw + c)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::scale(1.0)
    }
}

impl From<Calibration> for Vec<f64> {
    fn from(cal: Calibration) -> Self {
        cal.0
    }
}

impl TryFrom<CalibrationRepr> for Calibration {
    type Error = Error;

    fn try_from(repr: CalibrationRepr) -> Result<Self> {
        match repr {
            CalibrationRepr::Coefficients(c) => Ok(Calibration(c)),
            CalibrationRepr::Text(s) => s.parse(),
        }
    }
}

impl FromStr for Calibration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let coefficients = s
            .split(':')
            .map(|c| {
                c.trim().parse::<f64>().map_err(|err| {
                    Error::Definition(format!("invalid calibration coefficient {c:?}: {err}"))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok(Calibration(coefficients))
    }
}

/// Location, encoding and conversion of a single telemetry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct PointDefinition {
    #[builder(setter(into))]
    pub name: String,
    /// Offset of the point from the end of the packet header.
    #[builder(default)]
    #[serde(default)]
    pub start_byte: usize,
    /// Bit within the first byte, only used for points narrower than a byte.
    #[builder(default)]
    #[serde(default)]
    pub start_bit: u32,
    #[serde(alias = "size")]
    pub size_bits: u32,
    #[builder(default = DataType::Unsigned)]
    pub dtype: DataType,
    #[builder(default)]
    #[serde(default)]
    pub endian: Endian,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub calibration: Option<Calibration>,
    /// Single multiplier accepted in place of a calibration polynomial.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub conversion: Option<f64>,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub valid_min: Option<f64>,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub valid_max: Option<f64>,
    /// This point is the packet's time index.
    #[builder(default)]
    #[serde(default)]
    pub time_index: bool,
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub unit: Option<String>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub description: Option<String>,
}

impl PointDefinition {
    /// The polynomial applied to raw values. A `calibration` takes precedence over a
    /// `conversion`; with neither the raw value is used as-is.
    #[must_use]
    pub fn polynomial(&self) -> Calibration {
        match (&self.calibration, self.conversion) {
            (Some(cal), _) => cal.clone(),
            (None, Some(multiplier)) => Calibration::scale(multiplier),
            (None, None) => Calibration::default(),
        }
    }

    /// True if `value` is within the valid range, if any.
    #[must_use]
    pub fn in_range(&self, value: f64) -> bool {
        self.valid_min.map_or(true, |min| value >= min)
            && self.valid_max.map_or(true, |max| value <= max)
    }
}

/// Points of all packets with a single APID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct PacketDefinition {
    #[builder(setter(into))]
    pub name: String,
    pub apid: Apid,
    /// Name of the point used as the time index, overriding any point flags.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub time_index: Option<String>,
    pub points: Vec<PointDefinition>,
}

impl PacketDefinition {
    /// Position of the time index point in `points`, if any.
    #[must_use]
    pub fn time_index_position(&self) -> Option<usize> {
        match &self.time_index {
            Some(name) => self.points.iter().position(|p| &p.name == name),
            None => self.points.iter().position(|p| p.time_index),
        }
    }

    fn validate(&self, strict_float: bool) -> Result<()> {
        let mut names = HashSet::new();
        for point in &self.points {
            if !names.insert(point.name.as_str()) {
                return Err(Error::Definition(format!(
                    "packet {} has duplicate point {}",
                    self.name, point.name
                )));
            }
            UnpackFormat::for_point(point, strict_float)?;
        }
        if let Some(name) = &self.time_index {
            if self.time_index_position().is_none() {
                return Err(Error::Definition(format!(
                    "packet {} time index {name} is not one of its points",
                    self.name
                )));
            }
        }
        if let Some(pos) = self.time_index_position() {
            if self.points[pos].dtype == DataType::Char {
                return Err(Error::Definition(format!(
                    "packet {} time index {} cannot be a char point",
                    self.name, self.points[pos].name
                )));
            }
        }
        Ok(())
    }
}

/// All packet definitions for a mission.
///
/// # Example
/// ```
/// use cubeds::telemetry::Definitions;
///
/// let defs = Definitions::from_reader(r#"{
///   "packets": [{
///     "name": "beacon",
///     "apid": 5,
///     "points": [{"name": "mode", "size_bits": 8, "dtype": "dn"}]
///   }]
/// }"#.as_bytes()).unwrap();
/// assert_eq!(defs.get(5).unwrap().name, "beacon");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Definitions {
    pub packets: Vec<PacketDefinition>,
}

impl Definitions {
    #[must_use]
    pub fn new(packets: Vec<PacketDefinition>) -> Self {
        Definitions { packets }
    }

    /// Load JSON definitions.
    ///
    /// # Errors
    /// If the data is not valid JSON definitions.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Load JSON definitions from a file.
    ///
    /// # Errors
    /// If the file cannot be read or is not valid JSON definitions.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    #[must_use]
    pub fn get(&self, apid: Apid) -> Option<&PacketDefinition> {
        self.packets.iter().find(|p| p.apid == apid)
    }

    /// Check every definition can be used for extraction.
    ///
    /// # Errors
    /// [Error::Definition] or [Error::UnpackFormat] naming the packet or point at fault.
    pub fn validate(&self, strict_float: bool) -> Result<()> {
        let mut apids = HashSet::new();
        for packet in &self.packets {
            if !apids.insert(packet.apid) {
                return Err(Error::Definition(format!(
                    "apid {} is defined more than once",
                    packet.apid
                )));
            }
            packet.validate(strict_float)?;
        }
        Ok(())
    }
}
