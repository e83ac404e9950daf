//! # Sontex Supercom 587
//!
//! T1 water meter; reports the total volume as an 8-digit BCD record.

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

    if reading.numerics.is_empty() {
        return Err(MetersError::DecodeFailed(
            "supercom587 telegram carried no volume record".to_string(),
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
    fn test_bcd_total() {
        let raw = parse_hex_lenient("1E44EE4D4455223340077A55000000_0C1348231500").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        let area = parse_hex_lenient("0C1348231500").unwrap();
        let records = parse_records(&area).unwrap();
        let reading = decode(&t, &records).unwrap();
        assert!((reading.numeric("total").unwrap() - 152.348).abs() < 1e-9);
    }
}
