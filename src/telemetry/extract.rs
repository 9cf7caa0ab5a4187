use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::definitions::{Definitions, PacketDefinition, PointDefinition};
use super::unpack::{RawValue, UnpackFormat};
use crate::bits::{extract_bits_as_int, OnOutOfRangeBits};
use crate::prelude::*;
use crate::spacepacket::{Apid, Packet, PacketBucket};
use crate::stats::StageCounters;

/// Record key the time index is stored under.
pub const TIME_INDEX_KEY: &str = "time_index";

/// Unix time of the mission time epoch, 1999-12-31T23:59:23Z.
pub const TAI_EPOCH_UNIX_SECS: i64 = 946_684_763;

fn tai_epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(TAI_EPOCH_UNIX_SECS, 0).unwrap_or_default()
}

fn default_true() -> bool {
    true
}

/// Options controlling point extraction and record cleaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Drop points whose calibrated value is outside their valid range.
    #[serde(default = "default_true")]
    pub range_filter: bool,
    /// Read 32 bit floats as floats rather than as 8 byte doubles.
    #[serde(default)]
    pub strict_float: bool,
    /// What to do with sub-byte points that do not fit in their byte.
    #[serde(default)]
    pub out_of_range_bits: OnOutOfRangeBits,
    /// Records with an earlier time are dropped.
    #[serde(default)]
    pub min_time: Option<DateTime<Utc>>,
    /// Drop records with a time in the future.
    #[serde(default)]
    pub reject_future: bool,
    /// Epoch of time index values.
    #[serde(default = "tai_epoch")]
    pub time_epoch: DateTime<Utc>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            range_filter: true,
            strict_float: false,
            out_of_range_bits: OnOutOfRangeBits::default(),
            min_time: None,
            reject_future: false,
            time_epoch: tai_epoch(),
        }
    }
}

/// A decoded point value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            Value::Text(_) => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

/// Point values decoded from a single packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub apid: Apid,
    /// Name of the packet definition
    pub packet: String,
    /// Values by point name, including [TIME_INDEX_KEY].
    pub values: BTreeMap<String, Value>,
}

impl TelemetryRecord {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Seconds since the time epoch.
    #[must_use]
    pub fn time_index(&self) -> Option<f64> {
        self.values.get(TIME_INDEX_KEY).and_then(Value::as_f64)
    }

    /// The time index as a UTC time, or `None` if it is not representable.
    #[must_use]
    pub fn timestamp(&self, epoch: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let millis = (self.time_index()? * 1000.0).round();
        if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
            return None;
        }
        epoch.checked_add_signed(TimeDelta::try_milliseconds(millis as i64)?)
    }
}

/// Why a packet produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Discard {
    Truncated,
    NoTimeIndex,
    BadTime,
}

/// Extracts telemetry records from packets.
///
/// Unpack formats for every defined point are resolved once at construction, so a bad
/// definition fails before any data is read.
#[derive(Debug, Clone)]
pub struct TelemetryExtractor {
    definitions: Arc<Definitions>,
    formats: HashMap<Apid, Vec<UnpackFormat>>,
    options: ExtractOptions,
}

impl TelemetryExtractor {
    /// # Errors
    /// If the definitions do not validate, see [Definitions::validate].
    pub fn new(definitions: Arc<Definitions>, options: ExtractOptions) -> Result<Self> {
        definitions.validate(options.strict_float)?;
        let mut formats = HashMap::new();
        for packet in &definitions.packets {
            let packet_formats = packet
                .points
                .iter()
                .map(|p| UnpackFormat::for_point(p, options.strict_float))
                .collect::<Result<Vec<_>>>()?;
            formats.insert(packet.apid, packet_formats);
        }
        Ok(TelemetryExtractor {
            definitions,
            formats,
            options,
        })
    }

    #[must_use]
    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    #[must_use]
    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    fn point_value(
        &self,
        point: &PointDefinition,
        raw: RawValue,
        window: &[u8],
        counters: &mut StageCounters,
    ) -> Option<Value> {
        if let RawValue::Chars(bytes) = &raw {
            let text = String::from_utf8_lossy(bytes);
            return Some(Value::Text(text.trim_end_matches('\0').to_string()));
        }
        let raw = if point.size_bits < 8 {
            let carrier = u64::from(*window.first()?);
            match extract_bits_as_int(
                carrier,
                8,
                point.start_bit,
                point.size_bits,
                self.options.out_of_range_bits,
            ) {
                Ok(v) => v as f64,
                Err(err) => {
                    warn!(point = %point.name, "dropping point: {err}");
                    counters.points_bad_bits += 1;
                    return None;
                }
            }
        } else {
            raw.as_f64()?
        };
        let value = point.polynomial().evaluate(raw);
        if self.options.range_filter && !point.in_range(value) {
            debug!(
                point = %point.name,
                value,
                min = ?point.valid_min,
                max = ?point.valid_max,
                "value out of range, dropping point"
            );
            counters.points_out_of_range += 1;
            return None;
        }
        Some(Value::Number(value))
    }

    fn check_time(&self, time_index: f64) -> bool {
        let epoch = self.options.time_epoch;
        if self.options.min_time.is_none() && !self.options.reject_future {
            return true;
        }
        let millis = (time_index * 1000.0).round();
        let Some(time) = TimeDelta::try_milliseconds(millis as i64)
            .and_then(|delta| epoch.checked_add_signed(delta))
        else {
            return false;
        };
        if self.options.min_time.is_some_and(|min| time < min) {
            return false;
        }
        !(self.options.reject_future && time > Utc::now())
    }

    fn extract_inner(
        &self,
        definition: &PacketDefinition,
        formats: &[UnpackFormat],
        packet: &Packet,
        counters: &mut StageCounters,
    ) -> std::result::Result<(TelemetryRecord, bool), Discard> {
        let header_len = packet.header.header_len();
        let time_pos = definition.time_index_position();
        // header time only stands in when no point is the time index
        let mut time_index = match time_pos {
            Some(_) => None,
            None => packet.header.seconds.map(f64::from),
        };
        let mut values = BTreeMap::new();
        let mut complete = true;

        for (idx, (point, format)) in definition.points.iter().zip(formats).enumerate() {
            let start = header_len + point.start_byte;
            let unpacked = packet
                .data
                .get(start..start + format.size())
                .and_then(|w| Some((w, format.unpack(w, point.endian)?)));
            let Some((window, raw)) = unpacked else {
                if time_index.is_none() {
                    return Err(Discard::Truncated);
                }
                trace!(
                    apid = definition.apid,
                    point = %point.name,
                    len = packet.data.len(),
                    "packet truncated, keeping partial record"
                );
                complete = false;
                break;
            };
            let Some(value) = self.point_value(point, raw, window, counters) else {
                continue;
            };
            if Some(idx) == time_pos {
                if let Some(t) = value.as_f64() {
                    time_index = Some(t);
                }
            }
            values.insert(point.name.clone(), value);
        }

        let Some(time_index) = time_index else {
            return Err(Discard::NoTimeIndex);
        };
        if !self.check_time(time_index) {
            return Err(Discard::BadTime);
        }
        values.insert(TIME_INDEX_KEY.to_string(), Value::Number(time_index));
        Ok((
            TelemetryRecord {
                apid: definition.apid,
                packet: definition.name.clone(),
                values,
            },
            complete,
        ))
    }

    /// Extract a record from a single packet using `definition`.
    ///
    /// Returns `None` if the packet yields no usable record, which is never an error.
    ///
    /// # Errors
    /// [Error::Definition] if `definition` was not among those this extractor was created
    /// with.
    pub fn extract_packet(
        &self,
        definition: &PacketDefinition,
        packet: &Packet,
        counters: &mut StageCounters,
    ) -> Result<Option<TelemetryRecord>> {
        let formats = self.formats.get(&definition.apid).ok_or_else(|| {
            Error::Definition(format!("no unpack formats for apid {}", definition.apid))
        })?;
        match self.extract_inner(definition, formats, packet, counters) {
            Ok((record, complete)) => {
                counters.records_extracted += 1;
                if !complete {
                    counters.records_partial += 1;
                }
                Ok(Some(record))
            }
            Err(reason) => {
                debug!(
                    apid = definition.apid,
                    seq = packet.header.sequence_id,
                    ?reason,
                    "discarding packet"
                );
                counters.records_discarded += 1;
                Ok(None)
            }
        }
    }

    /// Extract records from every packet of every defined bucket. Undefined buckets are
    /// skipped.
    ///
    /// # Errors
    /// See [TelemetryExtractor::extract_packet].
    pub fn extract(
        &self,
        buckets: &BTreeMap<Apid, PacketBucket<'_>>,
        counters: &mut StageCounters,
    ) -> Result<Vec<TelemetryRecord>> {
        let mut records = Vec::new();
        for bucket in buckets.values() {
            let Some(definition) = bucket.definition else {
                counters.packets_undefined += bucket.packets.len();
                continue;
            };
            for packet in &bucket.packets {
                if let Some(record) = self.extract_packet(definition, packet, counters)? {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::spacepacket::{ApidDemultiplexer, PacketHeader};
    use crate::telemetry::{Calibration, DataType, Endian};

    const SECONDS: u32 = 600_000_000;

    fn packet(apid: u8, payload: &[u8]) -> Packet {
        let mut dat = vec![0x08, apid, 0xc0, 0x01, 0x00, 0x40];
        dat.extend_from_slice(&SECONDS.to_be_bytes());
        dat.extend_from_slice(&[0x00, 0x00]);
        dat.extend_from_slice(payload);
        Packet::decode(dat).unwrap()
    }

    fn point(name: &str, start_byte: usize, size_bits: u32) -> PointDefinition {
        PointDefinition::builder()
            .name(name)
            .start_byte(start_byte)
            .size_bits(size_bits)
            .build()
    }

    fn extractor(points: Vec<PointDefinition>, options: ExtractOptions) -> TelemetryExtractor {
        let defs = Definitions::new(vec![PacketDefinition::builder()
            .name("beacon")
            .apid(5)
            .points(points)
            .build()]);
        TelemetryExtractor::new(Arc::new(defs), options).unwrap()
    }

    fn extract_one(tlm: &TelemetryExtractor, packet: &Packet) -> Option<TelemetryRecord> {
        let mut counters = StageCounters::default();
        let def = tlm.definitions().get(packet.header.apid).unwrap();
        tlm.extract_packet(def, packet, &mut counters).unwrap()
    }

    #[test]
    fn extracts_calibrated_points() {
        let mut scaled = point("scaled", 0, 8);
        scaled.calibration = Some(Calibration::new(vec![0.0, 2.0]));
        let mut quad = point("quad", 1, 16);
        quad.calibration = Some(Calibration::new(vec![1.0, 0.5, 0.01]));
        let mut little = point("little", 3, 16);
        little.endian = Endian::Little;
        let mut signed = point("signed", 5, 8);
        signed.dtype = DataType::Signed;
        let tlm = extractor(vec![scaled, quad, little, signed], ExtractOptions::default());

        let record = extract_one(&tlm, &packet(5, &[100, 0x00, 0x0a, 0x34, 0x12, 0xfe])).unwrap();

        assert_eq!(record.apid, 5);
        assert_eq!(record.packet, "beacon");
        assert_eq!(record.get("scaled"), Some(&Value::Number(200.0)));
        let quad = record.get("quad").unwrap().as_f64().unwrap();
        assert!((quad - 7.0).abs() < 1e-9);
        assert_eq!(record.get("little"), Some(&Value::Number(f64::from(0x1234))));
        assert_eq!(record.get("signed"), Some(&Value::Number(-2.0)));
        assert_eq!(record.time_index(), Some(f64::from(SECONDS)));
    }

    #[test]
    fn sub_byte_points_are_masked() {
        let mut hi = point("hi", 0, 3);
        hi.start_bit = 0;
        let mut mid = point("mid", 0, 4);
        mid.start_bit = 3;
        let mut lo = point("lo", 0, 1);
        lo.start_bit = 7;
        let mut spill = point("spill", 0, 4);
        spill.start_bit = 6;
        let tlm = extractor(vec![hi, mid, lo, spill], ExtractOptions::default());

        let record = extract_one(&tlm, &packet(5, &[0b1011_0101])).unwrap();

        assert_eq!(record.get("hi"), Some(&Value::Number(0b101 as f64)));
        assert_eq!(record.get("mid"), Some(&Value::Number(0b1010 as f64)));
        assert_eq!(record.get("lo"), Some(&Value::Number(1.0)));
        assert_eq!(record.get("spill"), Some(&Value::Number(0.0)));
    }

    #[test]
    fn sub_byte_out_of_range_policy_error_drops_point() {
        let mut spill = point("spill", 0, 4);
        spill.start_bit = 6;
        let options = ExtractOptions {
            out_of_range_bits: OnOutOfRangeBits::Error,
            ..Default::default()
        };
        let tlm = extractor(vec![spill, point("next", 1, 8)], options);

        let mut counters = StageCounters::default();
        let def = tlm.definitions().get(5).unwrap();
        let record = tlm
            .extract_packet(def, &packet(5, &[0xff, 0x07]), &mut counters)
            .unwrap()
            .unwrap();

        assert!(record.get("spill").is_none());
        assert_eq!(record.get("next"), Some(&Value::Number(7.0)));
        assert_eq!(counters.points_bad_bits, 1);
    }

    #[test]
    fn range_filter_drops_only_the_point() {
        let mut checked = point("checked", 0, 8);
        checked.valid_min = Some(0.0);
        checked.valid_max = Some(10.0);
        let tlm = extractor(
            vec![checked.clone(), point("other", 1, 8)],
            ExtractOptions::default(),
        );

        let mut counters = StageCounters::default();
        let def = tlm.definitions().get(5).unwrap();
        let record = tlm
            .extract_packet(def, &packet(5, &[15, 3]), &mut counters)
            .unwrap()
            .unwrap();

        assert!(record.get("checked").is_none());
        assert_eq!(record.get("other"), Some(&Value::Number(3.0)));
        assert_eq!(counters.points_out_of_range, 1);

        let unfiltered = extractor(
            vec![checked, point("other", 1, 8)],
            ExtractOptions {
                range_filter: false,
                ..Default::default()
            },
        );
        let record = extract_one(&unfiltered, &packet(5, &[15, 3])).unwrap();
        assert_eq!(record.get("checked"), Some(&Value::Number(15.0)));
    }

    #[test]
    fn time_index_point_overrides_header_time() {
        let mut time = point("time", 0, 32);
        time.time_index = true;
        let tlm = extractor(vec![time, point("v", 4, 8)], ExtractOptions::default());

        let record = extract_one(&tlm, &packet(5, &[0x00, 0x00, 0x01, 0x00, 9])).unwrap();

        assert_eq!(record.time_index(), Some(256.0));
        assert_eq!(record.get("time"), Some(&Value::Number(256.0)));
    }

    fn timed_extractor(time: PointDefinition) -> TelemetryExtractor {
        let defs = Definitions::new(vec![PacketDefinition::builder()
            .name("beacon")
            .apid(5)
            .time_index("t")
            .points(vec![point("a", 0, 8), time])
            .build()]);
        TelemetryExtractor::new(Arc::new(defs), ExtractOptions::default()).unwrap()
    }

    #[test]
    fn time_index_point_keys_complete_packets() {
        let tlm = timed_extractor(point("t", 4, 32));
        let record = extract_one(&tlm, &packet(5, &[1, 0, 0, 0, 0, 0, 0, 7])).unwrap();
        assert_eq!(record.time_index(), Some(7.0));
        assert_eq!(record.get("a"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn truncated_before_time_index_point_is_discarded() {
        let tlm = timed_extractor(point("t", 4, 32));
        let mut counters = StageCounters::default();
        let def = tlm.definitions().get(5).unwrap();

        let zult = tlm
            .extract_packet(def, &packet(5, &[1, 2]), &mut counters)
            .unwrap();

        assert!(zult.is_none(), "got {zult:?}");
        assert_eq!(counters.records_discarded, 1);
        assert_eq!(counters.records_partial, 0);
    }

    #[test]
    fn filtered_time_index_point_discards_record() {
        let mut time = point("t", 4, 32);
        time.valid_max = Some(5.0);
        let tlm = timed_extractor(time);
        let mut counters = StageCounters::default();
        let def = tlm.definitions().get(5).unwrap();

        let zult = tlm
            .extract_packet(def, &packet(5, &[1, 0, 0, 0, 0, 0, 0, 9]), &mut counters)
            .unwrap();

        assert!(zult.is_none(), "got {zult:?}");
        assert_eq!(counters.points_out_of_range, 1);
        assert_eq!(counters.records_discarded, 1);
    }

    #[test]
    fn truncated_packet_keeps_partial_record() {
        let tlm = extractor(
            vec![point("a", 0, 8), point("b", 1, 32), point("c", 5, 8)],
            ExtractOptions::default(),
        );
        let mut counters = StageCounters::default();
        let def = tlm.definitions().get(5).unwrap();
        let record = tlm
            .extract_packet(def, &packet(5, &[1, 2, 3]), &mut counters)
            .unwrap()
            .unwrap();

        assert_eq!(record.get("a"), Some(&Value::Number(1.0)));
        assert!(record.get("b").is_none());
        assert!(record.get("c").is_none());
        assert!(record.time_index().is_some());
        assert_eq!(counters.records_partial, 1);
    }

    #[test]
    fn truncated_packet_without_time_is_discarded() {
        let tlm = extractor(
            vec![point("a", 0, 8), point("b", 1, 32)],
            ExtractOptions::default(),
        );
        // no secondary header so there is no header time
        let dat = vec![0x00, 0x05, 0xc0, 0x01, 0x00, 0x40, 0x01];
        let packet = Packet::decode(dat).unwrap();
        assert_eq!(packet.header.header_len(), PacketHeader::LEN);

        let mut counters = StageCounters::default();
        let def = tlm.definitions().get(5).unwrap();
        let zult = tlm.extract_packet(def, &packet, &mut counters).unwrap();

        assert!(zult.is_none());
        assert_eq!(counters.records_discarded, 1);
    }

    #[test]
    fn record_without_time_index_is_discarded() {
        let tlm = extractor(vec![point("a", 0, 8)], ExtractOptions::default());
        let packet = Packet::decode(vec![0x00, 0x05, 0xc0, 0x01, 0x00, 0x40, 0x01]).unwrap();
        assert!(extract_one(&tlm, &packet).is_none());
    }

    #[test]
    fn char_points_are_text() {
        let mut name = point("name", 0, 48);
        name.dtype = DataType::Char;
        let tlm = extractor(vec![name], ExtractOptions::default());

        let record = extract_one(&tlm, &packet(5, b"cube\0\0")).unwrap();

        assert_eq!(record.get("name"), Some(&Value::Text("cube".to_string())));
    }

    #[test]
    fn time_cleaning() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let options = ExtractOptions {
            time_epoch: epoch,
            min_time: Some(epoch + TimeDelta::try_seconds(i64::from(SECONDS) + 1).unwrap()),
            ..Default::default()
        };
        let tlm = extractor(vec![point("a", 0, 8)], options);
        assert!(extract_one(&tlm, &packet(5, &[1])).is_none());

        let options = ExtractOptions {
            time_epoch: Utc::now(),
            reject_future: true,
            ..Default::default()
        };
        let tlm = extractor(vec![point("a", 0, 8)], options);
        assert!(extract_one(&tlm, &packet(5, &[1])).is_none());

        let options = ExtractOptions {
            time_epoch: epoch,
            reject_future: true,
            ..Default::default()
        };
        let tlm = extractor(vec![point("a", 0, 8)], options);
        assert!(extract_one(&tlm, &packet(5, &[1])).is_some());
    }

    #[test]
    fn timestamp() {
        let tlm = extractor(vec![point("a", 0, 8)], ExtractOptions::default());
        let record = extract_one(&tlm, &packet(5, &[1])).unwrap();
        let ts = record.timestamp(tlm.options().time_epoch).unwrap();
        let expected = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 23).unwrap()
            + TimeDelta::try_seconds(i64::from(SECONDS)).unwrap();
        assert_eq!(ts, expected);
    }

    #[test]
    fn extract_skips_undefined_buckets() {
        let tlm = extractor(vec![point("a", 0, 8)], ExtractOptions::default());
        let demuxed = ApidDemultiplexer::default().demux(
            vec![packet(5, &[1]), packet(6, &[2]), packet(5, &[3])],
            tlm.definitions(),
        );
        let mut counters = StageCounters::default();

        let records = tlm.extract(&demuxed.buckets, &mut counters).unwrap();

        let values: Vec<f64> = records
            .iter()
            .map(|r| r.get("a").unwrap().as_f64().unwrap())
            .collect();
        assert_eq!(values, vec![1.0, 3.0]);
        assert_eq!(counters.packets_undefined, 1);
        assert_eq!(counters.records_extracted, 2);
    }

    #[test]
    fn options_deserialize_defaults() {
        let options: ExtractOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, ExtractOptions::default());
        let options: ExtractOptions = serde_json::from_str(
            r#"{"range_filter": false, "out_of_range_bits": "error", "time_epoch": "2000-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(!options.range_filter);
        assert_eq!(options.out_of_range_bits, OnOutOfRangeBits::Error);
        assert_eq!(
            options.time_epoch,
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
        );
    }
}
