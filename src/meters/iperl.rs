//! # Sensus iPERL
//!
//! T1 water meter transmitting mode 5 encrypted telegrams: total volume and
//! the momentary maximum flow.

use crate::error::MetersError;
use crate::meters::Reading;
use crate::telegram::record::{find_current, DataRecord, DifFunction};
use crate::telegram::Telegram;
use crate::units::Unit;

pub(crate) fn decode(_t: &Telegram, records: &[DataRecord]) -> Result<Reading, MetersError> {
    let mut reading = Reading::default();

    if let Some(r) = find_current(records, Unit::M3, DifFunction::Instantaneous) {
        reading.push_numeric("total", Unit::M3, r.scaled_value().unwrap_or(0.0));
    }
    if let Some(r) = records
        .iter()
        .find(|r| r.unit == Some(Unit::M3h) && r.function == DifFunction::Maximum)
    {
        reading.push_numeric("max_flow", Unit::M3h, r.scaled_value().unwrap_or(0.0));
    }

    if reading.numerics.is_empty() {
        return Err(MetersError::DecodeFailed(
            "iperl telegram carried no volume record".to_string(),
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
        let raw = parse_hex_lenient("1E44AE4C4455223368077A55000000_041308190000").unwrap();
        Telegram::parse(&raw).unwrap()
    }

    #[test]
    fn test_total_and_max_flow() {
        let area = parse_hex_lenient("0413D2040000123B0500").unwrap();
        let records = parse_records(&area).unwrap();
        let reading = decode(&telegram(), &records).unwrap();
        assert!((reading.numeric("total").unwrap() - 1.234).abs() < 1e-9);
        assert!((reading.numeric("max_flow").unwrap() - 0.005).abs() < 1e-9);
    }

    #[test]
    fn test_missing_volume_is_decode_failure() {
        let area = parse_hex_lenient("015B14").unwrap();
        let records = parse_records(&area).unwrap();
        assert!(matches!(
            decode(&telegram(), &records),
            Err(MetersError::DecodeFailed(_))
        ));
    }
}
