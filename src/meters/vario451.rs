//! # Techem Vario 4
//!
//! T1 heat meter with a vendor payload: the previous and current period
//! energies sit at fixed offsets, in thousandths of a gigajoule. The total
//! is reported in the canonical kWh.

use crate::error::MetersError;
use crate::meters::Reading;
use crate::telegram::record::DataRecord;
use crate::telegram::Telegram;
use crate::units::{convert, Unit};

const PREVIOUS_OFFSET: usize = 3;
const CURRENT_OFFSET: usize = 7;

pub(crate) fn decode(t: &Telegram, _records: &[DataRecord]) -> Result<Reading, MetersError> {
    let payload = t.record_area();
    if payload.len() < CURRENT_OFFSET + 2 {
        return Err(MetersError::DecodeFailed(format!(
            "vario451 payload too short: {} bytes",
            payload.len()
        )));
    }

    let previous_gj =
        f64::from(u16::from_le_bytes([payload[PREVIOUS_OFFSET], payload[PREVIOUS_OFFSET + 1]]))
            / 1000.0;
    let current_gj =
        f64::from(u16::from_le_bytes([payload[CURRENT_OFFSET], payload[CURRENT_OFFSET + 1]]))
            / 1000.0;
    let total_kwh = convert(previous_gj + current_gj, Unit::Gj, Unit::Kwh)?;

    let mut reading = Reading::default();
    reading.push_numeric("total_energy_consumption", Unit::Kwh, total_kwh);
    Ok(reading)
}
