//! # Tauron Amiplus
//!
//! T1 electricity meter built on an Apator module; BCD energy registers
//! with the same backward-flow extension as the Kamstrup electricity
//! meters.

use crate::error::MetersError;
use crate::meters::Reading;
use crate::telegram::record::{DataRecord, DifFunction};
use crate::telegram::Telegram;
use crate::units::Unit;

const VIFE_BACKWARD_FLOW: u8 = 0x3C;

pub(crate) fn decode(_t: &Telegram, records: &[DataRecord]) -> Result<Reading, MetersError> {
    let mut reading = Reading::default();

    let forward = |unit: Unit| {
        records.iter().find(move |r| {
            r.unit == Some(unit)
                && r.function == DifFunction::Instantaneous
                && r.is_current()
                && !r.vifes.iter().any(|&v| v & 0x7F == VIFE_BACKWARD_FLOW)
        })
    };
    let backward = |unit: Unit| {
        records.iter().find(move |r| {
            r.unit == Some(unit) && r.vifes.iter().any(|&v| v & 0x7F == VIFE_BACKWARD_FLOW)
        })
    };

    if let Some(r) = forward(Unit::Kwh) {
        reading.push_numeric(
            "total_energy_consumption",
            Unit::Kwh,
            r.scaled_value().unwrap_or(0.0),
        );
    }
    if let Some(r) = backward(Unit::Kwh) {
        reading.push_numeric(
            "total_energy_production",
            Unit::Kwh,
            r.scaled_value().unwrap_or(0.0),
        );
    }
    if let Some(r) = forward(Unit::Kw) {
        reading.push_numeric(
            "current_power_consumption",
            Unit::Kw,
            r.scaled_value().unwrap_or(0.0),
        );
    }
    if let Some(r) = backward(Unit::Kw) {
        reading.push_numeric(
            "current_power_production",
            Unit::Kw,
            r.scaled_value().unwrap_or(0.0),
        );
    }

    if reading.numerics.is_empty() {
        return Err(MetersError::DecodeFailed(
            "amiplus telegram carried no energy records".to_string(),
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
    fn test_bcd_energy_registers() {
        let raw = parse_hex_lenient("1E4401064433221110027A55000000").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        // 77.161 kWh consumed (BCD12 in Wh), 5.1 kW drawn (BCD6 in W)
        let area = parse_hex_lenient("0E03617107000000 0B2B005100").unwrap();
        let records = parse_records(&area).unwrap();
        let reading = decode(&t, &records).unwrap();
        assert!((reading.numeric("total_energy_consumption").unwrap() - 77.161).abs() < 1e-9);
        assert!((reading.numeric("current_power_consumption").unwrap() - 5.1).abs() < 1e-9);
    }
}
