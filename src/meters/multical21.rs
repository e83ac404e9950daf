//! # Kamstrup Multical 21 / flowIQ 3100
//!
//! C1 cold/warm water meters. Full telegrams carry plain volume and
//! temperature records; compact telegrams carry only the vendor info-code
//! word and housekeeping records. Status bits and the duration nibbles of
//! the info-code word describe the DRY/REVERSED/LEAKING/BURSTING states.

use crate::error::MetersError;
use crate::meters::{status_string, Reading};
use crate::telegram::record::{find_current, find_record, find_target, DataRecord, DifFunction};
use crate::telegram::Telegram;
use crate::units::Unit;

const INFO_CODE_DRY: u32 = 0x01;
const INFO_CODE_REVERSED: u32 = 0x02;
const INFO_CODE_LEAKING: u32 = 0x04;
const INFO_CODE_BURSTING: u32 = 0x08;

const INFO_CODE_DRY_SHIFT: u32 = 4;
const INFO_CODE_REVERSED_SHIFT: u32 = 7;
const INFO_CODE_LEAKING_SHIFT: u32 = 10;
const INFO_CODE_BURSTING_SHIFT: u32 = 13;

/// Rough age of a condition, encoded as a 3-bit bucket.
fn duration_bucket(code: u32) -> &'static str {
    match code & 0x7 {
        0 => "",
        1 => "1-8 hours",
        2 => "9-24 hours",
        3 => "2-3 days",
        4 => "4-7 days",
        5 => "8-14 days",
        6 => "15-21 days",
        _ => "22-31 days",
    }
}

pub(crate) fn decode(_t: &Telegram, records: &[DataRecord]) -> Result<Reading, MetersError> {
    let mut reading = Reading::default();

    if let Some(r) = find_current(records, Unit::M3, DifFunction::Instantaneous) {
        reading.push_numeric("total", Unit::M3, r.scaled_value().unwrap_or(0.0));
    }
    if let Some(r) = find_target(records, Unit::M3) {
        reading.push_numeric("target", Unit::M3, r.scaled_value().unwrap_or(0.0));
    }
    if let Some(r) = records
        .iter()
        .find(|r| r.unit == Some(Unit::M3h) && r.function == DifFunction::Maximum)
    {
        reading.push_numeric("max_flow", Unit::M3h, r.scaled_value().unwrap_or(0.0));
    }
    if let Some(r) = records
        .iter()
        .find(|r| r.quantity == "Flow temperature" && r.is_current())
    {
        reading.push_numeric("flow_temperature", Unit::C, r.scaled_value().unwrap_or(0.0));
    }
    if let Some(r) = records
        .iter()
        .find(|r| r.quantity == "External temperature" && r.is_current())
    {
        reading.push_numeric(
            "external_temperature",
            Unit::C,
            r.scaled_value().unwrap_or(0.0),
        );
    }

    // Info codes live in the vendor word of compact telegrams or in the
    // plain error-flag record of full ones
    let info = find_record(records, "02_FF20")
        .or_else(|| find_record(records, "04_FF23"))
        .or_else(|| find_record(records, "04_FD17"))
        .and_then(|r| r.scaled_value())
        .map(|v| v as u32);

    if let Some(info) = info {
        let dry = info & INFO_CODE_DRY != 0;
        let reversed = info & INFO_CODE_REVERSED != 0;
        let leaking = info & INFO_CODE_LEAKING != 0;
        let bursting = info & INFO_CODE_BURSTING != 0;
        reading.push_text(
            "current_status",
            status_string(dry, reversed, leaking, bursting),
        );
        if dry {
            reading.push_text(
                "time_dry",
                duration_bucket(info >> INFO_CODE_DRY_SHIFT).to_string(),
            );
        }
        if reversed {
            reading.push_text(
                "time_reversed",
                duration_bucket(info >> INFO_CODE_REVERSED_SHIFT).to_string(),
            );
        }
        if leaking {
            reading.push_text(
                "time_leaking",
                duration_bucket(info >> INFO_CODE_LEAKING_SHIFT).to_string(),
            );
        }
        if bursting {
            reading.push_text(
                "time_bursting",
                duration_bucket(info >> INFO_CODE_BURSTING_SHIFT).to_string(),
            );
        }
    }

    if reading.numerics.is_empty() && reading.texts.is_empty() {
        return Err(MetersError::DecodeFailed(
            "multical21 telegram carried no usable records".to_string(),
        ));
    }
    Ok(reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::record::parse_records;
    use crate::util::hex::parse_hex_lenient;

    fn telegram() -> Telegram {
        let raw =
            parse_hex_lenient("2A442D2C998734761B168D2087D078_04FD170000000002FD74DA11").unwrap();
        Telegram::parse(&raw).unwrap()
    }

    #[test]
    fn test_compact_telegram_status_only() {
        let t = telegram();
        let records = t.decode_records(None).unwrap();
        let reading = decode(&t, &records).unwrap();
        assert_eq!(reading.text("current_status"), Some("OK"));
        assert_eq!(reading.numeric("total"), None);
    }

    #[test]
    fn test_full_telegram_quantities() {
        // total 6.408 m3, target 6.408 m3, max flow 0.042 m3/h,
        // flow temp 20 C, external temp 21 C, info codes 0
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&parse_hex_lenient("041308190000").unwrap()); // total
        bytes.extend_from_slice(&parse_hex_lenient("441308190000").unwrap()); // target
        bytes.extend_from_slice(&parse_hex_lenient("123B2A00").unwrap()); // max flow 42 l/h
        bytes.extend_from_slice(&parse_hex_lenient("015B14").unwrap()); // flow temp 20 C
        bytes.extend_from_slice(&parse_hex_lenient("016715").unwrap()); // external temp 21 C
        bytes.extend_from_slice(&parse_hex_lenient("02FF200000").unwrap()); // info codes

        let records = parse_records(&bytes).unwrap();
        let reading = decode(&telegram(), &records).unwrap();

        assert!((reading.numeric("total").unwrap() - 6.408).abs() < 1e-9);
        assert!((reading.numeric("target").unwrap() - 6.408).abs() < 1e-9);
        assert!((reading.numeric("max_flow").unwrap() - 0.042).abs() < 1e-9);
        assert!((reading.numeric("flow_temperature").unwrap() - 20.0).abs() < 1e-9);
        assert!((reading.numeric("external_temperature").unwrap() - 21.0).abs() < 1e-9);
        assert_eq!(reading.text("current_status"), Some("OK"));
        assert_eq!(reading.text("time_dry"), None);
    }

    #[test]
    fn test_info_codes_dry() {
        // DRY flag plus duration bucket 2 (9-24 hours)
        let info: u32 = INFO_CODE_DRY | (2 << INFO_CODE_DRY_SHIFT);
        let mut bytes = vec![0x02, 0xFF, 0x20];
        bytes.extend_from_slice(&(info as u16).to_le_bytes());
        let records = parse_records(&bytes).unwrap();
        let reading = decode(&telegram(), &records).unwrap();
        assert_eq!(reading.text("current_status"), Some("DRY"));
        assert_eq!(reading.text("time_dry"), Some("9-24 hours"));
        assert_eq!(reading.text("time_leaking"), None);
    }
}
