//! # Kamstrup Omnipower
//!
//! C1 electricity meter. Consumption records carry a bare energy/power VIF;
//! production records carry the backward-flow extension (VIFE 0x3C).

use crate::error::MetersError;
use crate::meters::Reading;
use crate::telegram::record::{DataRecord, DifFunction};
use crate::telegram::Telegram;
use crate::units::Unit;

const VIFE_BACKWARD_FLOW: u8 = 0x3C;

fn find_forward<'a>(records: &'a [DataRecord], unit: Unit) -> Option<&'a DataRecord> {
    records.iter().find(|r| {
        r.unit == Some(unit)
            && r.function == DifFunction::Instantaneous
            && r.is_current()
            && !r.vifes.iter().any(|&v| v & 0x7F == VIFE_BACKWARD_FLOW)
    })
}

fn find_backward<'a>(records: &'a [DataRecord], unit: Unit) -> Option<&'a DataRecord> {
    records.iter().find(|r| {
        r.unit == Some(unit) && r.vifes.iter().any(|&v| v & 0x7F == VIFE_BACKWARD_FLOW)
    })
}

pub(crate) fn decode(_t: &Telegram, records: &[DataRecord]) -> Result<Reading, MetersError> {
    let mut reading = Reading::default();

    if let Some(r) = find_forward(records, Unit::Kwh) {
        reading.push_numeric(
            "total_energy_consumption",
            Unit::Kwh,
            r.scaled_value().unwrap_or(0.0),
        );
    }
    if let Some(r) = find_backward(records, Unit::Kwh) {
        reading.push_numeric(
            "total_energy_production",
            Unit::Kwh,
            r.scaled_value().unwrap_or(0.0),
        );
    }
    if let Some(r) = find_forward(records, Unit::Kw) {
        reading.push_numeric(
            "current_power_consumption",
            Unit::Kw,
            r.scaled_value().unwrap_or(0.0),
        );
    }
    if let Some(r) = find_backward(records, Unit::Kw) {
        reading.push_numeric(
            "current_power_production",
            Unit::Kw,
            r.scaled_value().unwrap_or(0.0),
        );
    }

    if reading.numerics.is_empty() {
        return Err(MetersError::DecodeFailed(
            "omnipower telegram carried no energy records".to_string(),
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
    fn test_consumption_and_production() {
        let raw = parse_hex_lenient("1E442D2C4433221130028D2012D078").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        // A+ 3218.05 kWh, A- 1.23 kWh, P+ 1.712 kW, P- 0 kW
        let area = parse_hex_lenient("0404CDE80400 04843C7B000000 042BB0060000 04AB3C00000000")
            .unwrap();
        let records = parse_records(&area).unwrap();
        let reading = decode(&t, &records).unwrap();
        assert!((reading.numeric("total_energy_consumption").unwrap() - 3218.05).abs() < 1e-9);
        assert!((reading.numeric("total_energy_production").unwrap() - 1.23).abs() < 1e-9);
        assert!((reading.numeric("current_power_consumption").unwrap() - 1.712).abs() < 1e-9);
        assert!((reading.numeric("current_power_production").unwrap()).abs() < 1e-9);
    }
}
