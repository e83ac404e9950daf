//! # Techem MK Radio 3
//!
//! T1 water meter with a vendor payload instead of DIF/VIF records: the
//! period volumes sit at fixed offsets, in tenths of a cubic metre. The
//! total is the previous period plus the current one; the previous period
//! doubles as the target reading.

use crate::error::MetersError;
use crate::meters::Reading;
use crate::telegram::record::DataRecord;
use crate::telegram::Telegram;
use crate::units::Unit;

const PREVIOUS_OFFSET: usize = 3;
const CURRENT_OFFSET: usize = 7;

pub(crate) fn decode(t: &Telegram, _records: &[DataRecord]) -> Result<Reading, MetersError> {
    let payload = t.record_area();
    if payload.len() < CURRENT_OFFSET + 2 {
        return Err(MetersError::DecodeFailed(format!(
            "mkradio3 payload too short: {} bytes",
            payload.len()
        )));
    }

    let previous =
        f64::from(u16::from_le_bytes([payload[PREVIOUS_OFFSET], payload[PREVIOUS_OFFSET + 1]]))
            / 10.0;
    let current =
        f64::from(u16::from_le_bytes([payload[CURRENT_OFFSET], payload[CURRENT_OFFSET + 1]]))
            / 10.0;

    let mut reading = Reading::default();
    reading.push_numeric("total", Unit::M3, previous + current);
    reading.push_numeric("target", Unit::M3, previous);
    Ok(reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::hex::parse_hex_lenient;

    #[test]
    fn test_fixed_offsets() {
        // previous 12.8 m3 (0x0080), current 1.3 m3 (0x000D)
        let raw = parse_hex_lenient("1A44685044332211267262_000000_8000_0000_0D00").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        let reading = decode(&t, &[]).unwrap();
        assert!((reading.numeric("total").unwrap() - 14.1).abs() < 1e-9);
        assert!((reading.numeric("target").unwrap() - 12.8).abs() < 1e-9);
    }

    #[test]
    fn test_short_payload() {
        let raw = parse_hex_lenient("1A4468504433221126726200").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        assert!(matches!(
            decode(&t, &[]),
            Err(MetersError::DecodeFailed(_))
        ));
    }
}
