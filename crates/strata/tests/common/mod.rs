//! Shared fixtures: a fixed-width test record layout and its codec.

use strata::{Record, RecordCodec, RecordKind, RecordTime};

/// Fixed record length used by all integration tests.
pub const RECLEN: usize = 64;

/// Builds a data record with an encoded payload the [`TestCodec`] can read
/// back. The `id` byte lands in the payload tail so tests can tell records
/// apart on disk.
#[allow(clippy::too_many_arguments)]
pub fn build_record(
    station: &str,
    quality: char,
    kind: RecordKind,
    day: u16,
    hour: u8,
    minute: u8,
    sample_count: u32,
    id: u8,
) -> Record {
    let start = RecordTime {
        year: 2004,
        day,
        hour,
        minute,
        second: 0,
        fract: 0,
    };

    let mut payload = vec![0u8; RECLEN];
    payload[0..2].copy_from_slice(b"TR");
    payload[2..4].copy_from_slice(b"XX");
    let mut sta = [b' '; 5];
    sta[..station.len()].copy_from_slice(station.as_bytes());
    payload[4..9].copy_from_slice(&sta);
    payload[9..11].copy_from_slice(b"00");
    payload[11..14].copy_from_slice(b"BHZ");
    payload[14] = quality as u8;
    payload[15..17].copy_from_slice(&start.year.to_le_bytes());
    payload[17..19].copy_from_slice(&start.day.to_le_bytes());
    payload[19] = start.hour;
    payload[20] = start.minute;
    payload[21] = start.second;
    payload[22..24].copy_from_slice(&start.fract.to_le_bytes());
    payload[24..32].copy_from_slice(&1.0f64.to_le_bytes());
    payload[32..36].copy_from_slice(&sample_count.to_le_bytes());
    payload[40] = id;

    Record {
        network: "XX".to_string(),
        station: station.to_string(),
        location: "00".to_string(),
        channel: "BHZ".to_string(),
        quality,
        kind,
        start,
        sample_rate: 1.0,
        sample_count,
        payload,
    }
}

/// Decodes the fixed-width test layout written by [`build_record`].
pub struct TestCodec;

impl RecordCodec for TestCodec {
    fn decode(&self, bytes: &[u8]) -> Option<Record> {
        if bytes.len() != RECLEN || &bytes[0..2] != b"TR" {
            return None;
        }
        let year = u16::from_le_bytes([bytes[15], bytes[16]]);
        if !(1900..=2500).contains(&year) {
            return None;
        }
        let text = |range: std::ops::Range<usize>| {
            std::str::from_utf8(&bytes[range])
                .ok()
                .map(|s| s.trim_end().to_string())
        };
        Some(Record {
            network: text(2..4)?,
            station: text(4..9)?,
            location: text(9..11)?,
            channel: text(11..14)?,
            quality: bytes[14] as char,
            kind: RecordKind::Data,
            start: RecordTime {
                year,
                day: u16::from_le_bytes([bytes[17], bytes[18]]),
                hour: bytes[19],
                minute: bytes[20],
                second: bytes[21],
                fract: u16::from_le_bytes([bytes[22], bytes[23]]),
            },
            sample_rate: f64::from_le_bytes(bytes[24..32].try_into().ok()?),
            sample_count: u32::from_le_bytes(bytes[32..36].try_into().ok()?),
            payload: bytes.to_vec(),
        })
    }
}
