//! # Kamstrup Multical 302
//!
//! C1 heat meter: total energy, total volume and the momentary power.

use crate::error::MetersError;
use crate::meters::Reading;
use crate::telegram::record::{find_current, DataRecord, DifFunction};
use crate::telegram::Telegram;
use crate::units::Unit;

pub(crate) fn decode(_t: &Telegram, records: &[DataRecord]) -> Result<Reading, MetersError> {
    let mut reading = Reading::default();

    if let Some(r) = find_current(records, Unit::Kwh, DifFunction::Instantaneous) {
        reading.push_numeric(
            "total_energy_consumption",
            Unit::Kwh,
            r.scaled_value().unwrap_or(0.0),
        );
    }
    if let Some(r) = find_current(records, Unit::M3, DifFunction::Instantaneous) {
        reading.push_numeric("total_volume", Unit::M3, r.scaled_value().unwrap_or(0.0));
    }
    if let Some(r) = find_current(records, Unit::Kw, DifFunction::Instantaneous) {
        reading.push_numeric(
            "current_power_consumption",
            Unit::Kw,
            r.scaled_value().unwrap_or(0.0),
        );
    }

    if reading.numerics.is_empty() {
        return Err(MetersError::DecodeFailed(
            "multical302 telegram carried no usable records".to_string(),
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
    fn test_heat_quantities() {
        let raw = parse_hex_lenient("1E442D2C443322331B048D2012D078").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        // energy 123 kWh (0x7B at 10^0 kWh), volume 4.568 m3, power 1.3 kW
        let area = parse_hex_lenient("04067B000000 0413D8110000 042D0D000000").unwrap();
        let records = parse_records(&area).unwrap();
        let reading = decode(&t, &records).unwrap();
        assert!((reading.numeric("total_energy_consumption").unwrap() - 123.0).abs() < 1e-9);
        assert!((reading.numeric("total_volume").unwrap() - 4.568).abs() < 1e-9);
        assert!((reading.numeric("current_power_consumption").unwrap() - 1.3).abs() < 1e-9);
    }
}
