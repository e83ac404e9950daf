//! # Innotas EurisII
//!
//! T1 heat cost allocator; same projection as the other allocators:
//! current consumption, consumption at the set date, set date.

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
    if let Some(r) = records
        .iter()
        .find(|r| r.storage_nr > 0 && matches!(r.value, RecordValue::Date(_)))
    {
        if let RecordValue::Date(date) = r.value {
            reading.push_text("set_date", date.format("%Y-%m-%d").to_string());
        }
    }

    if reading.numerics.is_empty() {
        return Err(MetersError::DecodeFailed(
            "eurisii telegram carried no consumption records".to_string(),
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
    fn test_current_consumption() {
        let raw = parse_hex_lenient("1E44C5254433221155087A55000000").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        let area = parse_hex_lenient("026E2A00").unwrap();
        let records = parse_records(&area).unwrap();
        let reading = decode(&t, &records).unwrap();
        assert!((reading.numeric("current_consumption").unwrap() - 42.0).abs() < 1e-9);
        assert_eq!(reading.text("set_date"), None);
    }
}
