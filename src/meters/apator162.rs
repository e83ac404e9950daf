//! # Apator at-wmbus-16-2
//!
//! C1/T1 water meter with an undocumented vendor payload. The only field
//! recovered so far is the total volume counter, a 32-bit litre count at a
//! fixed offset.
//!
//! TODO: map the remaining payload bytes once captures with a known
//! reference reading are available.

use crate::error::MetersError;
use crate::meters::Reading;
use crate::telegram::record::DataRecord;
use crate::telegram::Telegram;
use crate::units::Unit;

const TOTAL_OFFSET: usize = 9;

pub(crate) fn decode(t: &Telegram, _records: &[DataRecord]) -> Result<Reading, MetersError> {
    let payload = t.record_area();
    if payload.len() < TOTAL_OFFSET + 4 {
        return Err(MetersError::DecodeFailed(format!(
            "apator162 payload too short: {} bytes",
            payload.len()
        )));
    }

    let litres = u32::from_le_bytes([
        payload[TOTAL_OFFSET],
        payload[TOTAL_OFFSET + 1],
        payload[TOTAL_OFFSET + 2],
        payload[TOTAL_OFFSET + 3],
    ]);

    let mut reading = Reading::default();
    reading.push_numeric("total", Unit::M3, f64::from(litres) / 1000.0);
    Ok(reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::hex::parse_hex_lenient;

    #[test]
    fn test_total_at_fixed_offset() {
        // 34567 litres at offset 9 of the vendor payload
        let raw =
            parse_hex_lenient("1A440106443322110507A1_000000000000000000_07870000").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        let reading = decode(&t, &[]).unwrap();
        assert!((reading.numeric("total").unwrap() - 34.567).abs() < 1e-9);
    }
}
