#![allow(dead_code)]
use cubeds::config::MissionConfig;
use cubeds::framing::kiss;
use cubeds::telemetry::Definitions;

/// Sync marker used by the test mission, followed in every frame by a 16 byte AX.25 header.
pub const SYNC_HEX: &str = "86a24040404060aca6a64040404061f0";
pub const AX25_HEADER: [u8; 16] = [0x11; 16];
pub const SECONDS: u32 = 650_000_000;
pub const VCDU_FRAME_SIZE: usize = 512;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn sync() -> Vec<u8> {
    hex::decode(SYNC_HEX).unwrap()
}

/// Packet bytes with a secondary header, sized the way the stitcher slices first segments.
pub fn packet_bytes(apid: u8, flags: u8, seq: u16, len_minus1: u16, payload: &[u8]) -> Vec<u8> {
    let mut dat = vec![0u8; usize::from(len_minus1) + 12 - 5];
    dat[0] = 0x08;
    dat[1] = apid;
    dat[2..4].copy_from_slice(&((u16::from(flags) << 14) | seq).to_be_bytes());
    dat[4..6].copy_from_slice(&len_minus1.to_be_bytes());
    dat[6..10].copy_from_slice(&SECONDS.to_be_bytes());
    dat[12..12 + payload.len()].copy_from_slice(payload);
    dat
}

/// Continuation or last segment bytes: header, then `payload` padded to the length the
/// stitcher takes from later segments.
pub fn segment_bytes(apid: u8, flags: u8, seq: u16, len_minus1: u16, payload: &[u8]) -> Vec<u8> {
    let mut dat = vec![0u8; usize::from(len_minus1) + 12 + 1];
    dat[..12].copy_from_slice(&packet_bytes(apid, flags, seq, 60, &[])[..12]);
    dat[4..6].copy_from_slice(&len_minus1.to_be_bytes());
    dat[12..12 + payload.len()].copy_from_slice(payload);
    dat
}

/// A capture of KISS escaped packets, each behind the sync marker and an AX.25 header,
/// terminated by a final sync marker.
pub fn ax25_capture(packets: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = vec![0x00, 0x01, 0x02];
    for packet in packets {
        buf.extend(sync());
        buf.extend_from_slice(&AX25_HEADER);
        buf.extend(kiss::stuff(packet));
    }
    buf.extend(sync());
    buf
}

/// A VCDU frame for spacecraft 1, virtual channel 0, packets starting at the first byte of
/// the data field.
pub fn vcdu_frame(count: u8, packets: &[Vec<u8>]) -> Vec<u8> {
    let mut dat = vec![0x00, 0x10, 0x00, count, 0x00, 0x00];
    for packet in packets {
        dat.extend_from_slice(packet);
    }
    dat.resize(VCDU_FRAME_SIZE, 0xff);
    dat
}

/// Packet bytes as carried in a VCDU, `len_minus1 + 12` bytes long.
pub fn vcdu_packet(apid: u8, seq: u16, len_minus1: u16, payload: &[u8]) -> Vec<u8> {
    let mut dat = packet_bytes(apid, 3, seq, len_minus1, payload);
    dat.resize(usize::from(len_minus1) + 12, 0x00);
    dat
}

pub fn definitions() -> Definitions {
    Definitions::from_reader(
        r#"{
  "packets": [
    {
      "name": "beacon",
      "apid": 5,
      "points": [
        {"name": "value", "start_byte": 0, "size_bits": 8, "dtype": "dn", "calibration": [0, 1]},
        {"name": "temp", "start_byte": 1, "size_bits": 16, "dtype": "sn",
         "calibration": "0:0.5", "valid_min": -40, "valid_max": 80}
      ]
    },
    {
      "name": "status",
      "apid": 6,
      "points": [
        {"name": "mode", "start_byte": 0, "start_bit": 4, "size_bits": 4, "dtype": "dn"}
      ]
    }
  ]
}"#
        .as_bytes(),
    )
    .unwrap()
}

pub fn mission_config() -> MissionConfig {
    let json = format!(
        r#"{{
  "mission": "test",
  "decoders": [
    {{"priority": 1, "regex": ["\\.kss$"], "stage": {{"kind": "ax25", "frame": "{SYNC_HEX}", "header_length": 32}}}},
    {{"priority": 2, "regex": ["\\.kss$"], "stage": {{"kind": "kiss"}}}},
    {{"priority": 3, "regex": ["\\.kss$"], "stage": {{"kind": "stitch"}}}},
    {{"priority": 1, "regex": ["^sband_"], "stage": {{"kind": "vcdu", "frame_size": {VCDU_FRAME_SIZE}}}}},
    {{"priority": 1, "regex": ["\\.raw$"], "stage": {{"kind": "search", "apids": [5, 6]}}}},
    {{"priority": 9, "regex": ["."], "stage": {{"kind": "telemetry"}}}}
  ]
}}"#
    );
    MissionConfig::from_reader(json.as_bytes()).unwrap()
}
