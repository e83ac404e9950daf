//! # Qundis Q caloric
//!
//! C1 heat cost allocator: the current consumption, the consumption frozen
//! at the set date, and the set date itself.

use crate::error::MetersError;
use crate::meters::Reading;
use crate::telegram::record::{DataRecord, DifFunction, RecordValue};
use crate::telegram::Telegram;
use crate::units::Unit;

pub(crate) fn decode(_t: &Telegram, records: &[DataRecord]) -> Result<Reading, MetersError> {
    let mut reading = Reading::default();

    if let Some(r) = records.iter().find(|r| {
        r.unit == Some(Unit::Hca) && r.function == DifFunction::Instantaneous && r.is_current()
    }) {
        reading.push_numeric(
            "current_consumption",
            Unit::Hca,
            r.scaled_value().unwrap_or(0.0),
        );
    }
    if let Some(r) = records
        .iter()
        .find(|r| r.unit == Some(Unit::Hca) && r.storage_nr > 0)
    {
        reading.push_numeric(
            "consumption_at_set_date",
            Unit::Hca,
            r.scaled_value().unwrap_or(0.0),
        );
    }
    if let Some(r) = records.iter().find(|r| {
        r.storage_nr > 0 && matches!(r.value, RecordValue::Date(_))
    }) {
        if let RecordValue::Date(date) = r.value {
            reading.push_text("set_date", date.format("%Y-%m-%d").to_string());
        }
    }

    if reading.numerics.is_empty() {
        return Err(MetersError::DecodeFailed(
            "qcaloric telegram carried no consumption records".to_string(),
        ));
    }
    Ok(reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::record::parse_records;
    use crate::util::hex::parse_hex_lenient;

    #[test]
    fn test_consumption_and_set_date() {
        let raw = parse_hex_lenient("1E449344443322113508 7A55000000").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        // current 131 hca, at set date 121 hca, set date 2018-12-31
        let mut area = parse_hex_lenient("026E8300 426E7900").unwrap();
        // 42 6C: type G date, storage 1
        area.extend_from_slice(&[0x42, 0x6C]);
        let yy = 18u8;
        area.push(((yy & 0x07) << 5) | 31);
        area.push(((yy & 0x78) << 1) | 12);

        let records = parse_records(&area).unwrap();
        let reading = decode(&t, &records).unwrap();
        assert!((reading.numeric("current_consumption").unwrap() - 131.0).abs() < 1e-9);
        assert!((reading.numeric("consumption_at_set_date").unwrap() - 121.0).abs() < 1e-9);
        assert_eq!(reading.text("set_date"), Some("2018-12-31"));
    }
}
