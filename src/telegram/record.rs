//! # Data Record Decoding
//!
//! Iterates the DIF/DIFE/VIF/VIFE tuples of a telegram's record area per
//! EN 13757-3 and turns each into a [`DataRecord`]: storage/tariff/subunit
//! coordinates, the function field, a canonical physical unit with a power
//! of ten, and the decoded value.
//!
//! Records whose VIF the receiver does not recognize are preserved raw and
//! remain reachable through their hex key, so family decoders can still pick
//! them up.

use crate::telegram::encoding::{
    decode_bcd, decode_int, decode_lvar_text, decode_real, decode_type_f_datetime,
    decode_type_g_date,
};
use crate::units::Unit;
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt::Write as _;
use std::ops::Range;
use thiserror::Error;

/// Idle filler byte between records.
pub const DIF_IDLE_FILLER: u8 = 0x2F;
/// Manufacturer specific data block; consumes the rest of the record area.
pub const DIF_MANUFACTURER_SPECIFIC: u8 = 0x0F;
/// Manufacturer specific data block with more records following.
pub const DIF_MORE_RECORDS_FOLLOW: u8 = 0x1F;

const EXTENSION_BIT: u8 = 0x80;
const MAX_DIFE_VIFE: usize = 10;

/// Errors from the record iterator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Record area ended inside a record at offset {0}")]
    PrematureEnd(usize),

    #[error("Unsupported data field 0x{0:02X} at offset {1}")]
    UnsupportedDataField(u8, usize),

    #[error("Too many extension bytes at offset {0}")]
    ExtensionOverflow(usize),

    #[error("Invalid BCD data at offset {0}")]
    InvalidBcd(usize),
}

/// The DIF function field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifFunction {
    Instantaneous,
    Maximum,
    Minimum,
    DuringError,
}

/// The decoded value of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Numeric(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
}

/// One decoded DIF/VIF tuple.
#[derive(Debug, Clone)]
pub struct DataRecord {
    pub dif: u8,
    pub difes: Vec<u8>,
    pub vif: u8,
    pub vifes: Vec<u8>,
    pub storage_nr: u32,
    pub tariff: u32,
    pub subunit: u32,
    pub function: DifFunction,
    /// Canonical physical unit, when the VIF is recognized.
    pub unit: Option<Unit>,
    /// Power of ten relative to the canonical unit.
    pub exponent: i32,
    pub quantity: &'static str,
    pub value: RecordValue,
    /// Byte range within the record area, for diagnostics.
    pub offset: Range<usize>,
}

impl DataRecord {
    /// Stable string key `"<DIF+DIFEs hex>_<VIF+VIFEs hex>"`, uppercase,
    /// e.g. `"04_13"`, `"44_13"`, `"02_FF20"`.
    pub fn key(&self) -> String {
        let mut key = String::new();
        let _ = write!(key, "{:02X}", self.dif);
        for dife in &self.difes {
            let _ = write!(key, "{dife:02X}");
        }
        key.push('_');
        let _ = write!(key, "{:02X}", self.vif);
        for vife in &self.vifes {
            let _ = write!(key, "{vife:02X}");
        }
        key
    }

    /// The numeric value scaled into the canonical unit.
    pub fn scaled_value(&self) -> Option<f64> {
        match self.value {
            RecordValue::Numeric(v) => Some(v * 10f64.powi(self.exponent)),
            _ => None,
        }
    }

    pub fn is_current(&self) -> bool {
        self.storage_nr == 0 && self.tariff == 0 && self.subunit == 0
    }
}

/// What a recognized VIF says about the value.
struct VibInfo {
    unit: Option<Unit>,
    exponent: i32,
    quantity: &'static str,
    kind: VibKind,
}

#[derive(PartialEq)]
enum VibKind {
    Numeric,
    Date,
    DateTime,
    Unknown,
}

fn lookup_vib(vif: u8, vifes: &[u8]) -> VibInfo {
    let numeric = |unit, exponent, quantity| VibInfo {
        unit: Some(unit),
        exponent,
        quantity,
        kind: VibKind::Numeric,
    };
    let unknown = VibInfo {
        unit: None,
        exponent: 0,
        quantity: "unknown",
        kind: VibKind::Unknown,
    };
    let n = i32::from(vif & 0x07);
    match vif & 0x7F {
        // Energy, 10^(nnn-3) Wh
        0x00..=0x07 => numeric(Unit::Kwh, n - 6, "Energy"),
        // Energy, 10^nnn J
        0x08..=0x0F => numeric(Unit::Gj, n - 9, "Energy"),
        // Volume, 10^(nnn-6) m3
        0x10..=0x17 => numeric(Unit::M3, n - 6, "Volume"),
        // On time / operating time; only the s/min/h codings are cataloged
        0x20 | 0x24 => numeric(Unit::Second, 0, "On time"),
        0x21 | 0x25 => numeric(Unit::Minute, 0, "On time"),
        0x22 | 0x26 => numeric(Unit::Hour, 0, "On time"),
        // Power, 10^(nnn-3) W
        0x28..=0x2F => numeric(Unit::Kw, n - 6, "Power"),
        // Volume flow, 10^(nnn-6) m3/h
        0x38..=0x3F => numeric(Unit::M3h, n - 6, "Volume flow"),
        // Temperatures, 10^(nn-3) degrees C
        0x58..=0x5B => numeric(Unit::C, i32::from(vif & 0x03) - 3, "Flow temperature"),
        0x5C..=0x5F => numeric(Unit::C, i32::from(vif & 0x03) - 3, "Return temperature"),
        0x60..=0x63 => numeric(Unit::C, i32::from(vif & 0x03) - 3, "Temperature difference"),
        0x64..=0x67 => numeric(Unit::C, i32::from(vif & 0x03) - 3, "External temperature"),
        0x6C => VibInfo {
            unit: None,
            exponent: 0,
            quantity: "Date",
            kind: VibKind::Date,
        },
        0x6D => VibInfo {
            unit: None,
            exponent: 0,
            quantity: "Date and time",
            kind: VibKind::DateTime,
        },
        0x6E => numeric(Unit::Hca, 0, "H.C.A."),
        // First extension table (VIF 0xFD); only the error-flag entry is
        // recognized, the rest stay raw-keyed
        0x7D => match vifes.first() {
            Some(&vife) if vife & 0x7F == 0x17 => VibInfo {
                unit: None,
                exponent: 0,
                quantity: "Error flags",
                kind: VibKind::Numeric,
            },
            _ => unknown,
        },
        _ => unknown,
    }
}

/// Data length in bytes implied by the DIF data field; `None` for the
/// variable-length coding 0x0D.
fn dif_data_length(dif: u8) -> Result<Option<usize>, u8> {
    match dif & 0x0F {
        0x0 => Ok(Some(0)),
        0x1 => Ok(Some(1)),
        0x2 => Ok(Some(2)),
        0x3 => Ok(Some(3)),
        0x4 => Ok(Some(4)),
        0x5 => Ok(Some(4)), // 32-bit real
        0x6 => Ok(Some(6)),
        0x7 => Ok(Some(8)),
        0x9 => Ok(Some(1)),
        0xA => Ok(Some(2)),
        0xB => Ok(Some(3)),
        0xC => Ok(Some(4)),
        0xD => Ok(None),
        0xE => Ok(Some(6)),
        other => Err(other),
    }
}

/// Parses the record area of a telegram into an ordered list of records.
pub fn parse_records(area: &[u8]) -> Result<Vec<DataRecord>, RecordError> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < area.len() {
        if area[pos] == DIF_IDLE_FILLER {
            pos += 1;
            continue;
        }

        let start = pos;
        let dif = area[pos];
        pos += 1;

        if dif == DIF_MANUFACTURER_SPECIFIC || dif == DIF_MORE_RECORDS_FOLLOW {
            // All remaining bytes belong to the manufacturer block
            records.push(DataRecord {
                dif,
                difes: Vec::new(),
                vif: 0,
                vifes: Vec::new(),
                storage_nr: 0,
                tariff: 0,
                subunit: 0,
                function: DifFunction::Instantaneous,
                unit: None,
                exponent: 0,
                quantity: "Manufacturer specific",
                value: RecordValue::Bytes(area[pos..].to_vec()),
                offset: start..area.len(),
            });
            break;
        }

        let mut difes = Vec::new();
        let mut ext = dif & EXTENSION_BIT;
        while ext != 0 {
            if pos >= area.len() {
                return Err(RecordError::PrematureEnd(pos));
            }
            if difes.len() >= MAX_DIFE_VIFE {
                return Err(RecordError::ExtensionOverflow(pos));
            }
            let dife = area[pos];
            difes.push(dife);
            pos += 1;
            ext = dife & EXTENSION_BIT;
        }

        if pos >= area.len() {
            return Err(RecordError::PrematureEnd(pos));
        }
        let vif = area[pos];
        pos += 1;

        let mut vifes = Vec::new();
        ext = vif & EXTENSION_BIT;
        while ext != 0 {
            if pos >= area.len() {
                return Err(RecordError::PrematureEnd(pos));
            }
            if vifes.len() >= MAX_DIFE_VIFE {
                return Err(RecordError::ExtensionOverflow(pos));
            }
            let vife = area[pos];
            vifes.push(vife);
            pos += 1;
            ext = vife & EXTENSION_BIT;
        }

        // Storage, tariff and subunit accumulate over DIF bit 6 and the
        // DIFE nibbles
        let mut storage_nr = u32::from((dif >> 6) & 0x01);
        let mut tariff = 0u32;
        let mut subunit = 0u32;
        for (j, dife) in difes.iter().enumerate() {
            storage_nr |= u32::from(dife & 0x0F) << (1 + 4 * j);
            tariff |= u32::from((dife >> 4) & 0x03) << (2 * j);
            subunit |= u32::from((dife >> 6) & 0x01) << j;
        }

        let function = match (dif >> 4) & 0x03 {
            0 => DifFunction::Instantaneous,
            1 => DifFunction::Maximum,
            2 => DifFunction::Minimum,
            _ => DifFunction::DuringError,
        };

        let data_len = match dif_data_length(dif) {
            Ok(Some(len)) => len,
            Ok(None) => {
                // LVAR: one length byte precedes the data
                if pos >= area.len() {
                    return Err(RecordError::PrematureEnd(pos));
                }
                let len = area[pos] as usize;
                pos += 1;
                len
            }
            Err(field) => return Err(RecordError::UnsupportedDataField(field, start)),
        };

        if pos + data_len > area.len() {
            return Err(RecordError::PrematureEnd(pos));
        }
        let data = &area[pos..pos + data_len];
        pos += data_len;

        let vib = lookup_vib(vif, &vifes);
        let value = decode_value(dif, data, &vib, pos)?;

        records.push(DataRecord {
            dif,
            difes,
            vif,
            vifes,
            storage_nr,
            tariff,
            subunit,
            function,
            unit: vib.unit,
            exponent: vib.exponent,
            quantity: vib.quantity,
            value,
            offset: start..pos,
        });
    }

    Ok(records)
}

fn decode_value(dif: u8, data: &[u8], vib: &VibInfo, pos: usize) -> Result<RecordValue, RecordError> {
    if vib.kind == VibKind::Date {
        return Ok(decode_type_g_date(data)
            .map(RecordValue::Date)
            .unwrap_or_else(|| RecordValue::Bytes(data.to_vec())));
    }
    if vib.kind == VibKind::DateTime {
        return Ok(decode_type_f_datetime(data)
            .map(RecordValue::DateTime)
            .unwrap_or_else(|| RecordValue::Bytes(data.to_vec())));
    }
    let value = match dif & 0x0F {
        0x0 => RecordValue::Numeric(0.0),
        // Integer/binary
        0x1 | 0x2 | 0x3 | 0x4 | 0x6 | 0x7 => {
            let size = match dif & 0x0F {
                0x7 => 8,
                other => other as usize,
            };
            let (_, v) = decode_int(data, size)
                .map_err(|_| RecordError::PrematureEnd(pos))?;
            RecordValue::Numeric(v as f64)
        }
        // 32-bit real
        0x5 => {
            let (_, v) = decode_real(data).map_err(|_| RecordError::PrematureEnd(pos))?;
            RecordValue::Numeric(v)
        }
        // BCD
        0x9 | 0xA | 0xB | 0xC | 0xE => {
            let (_, v) =
                decode_bcd(data, data.len()).map_err(|_| RecordError::InvalidBcd(pos))?;
            RecordValue::Numeric(v as f64)
        }
        // LVAR: text when printable, raw bytes otherwise
        0xD => {
            if data.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
                RecordValue::Text(decode_lvar_text(data))
            } else {
                RecordValue::Bytes(data.to_vec())
            }
        }
        _ => RecordValue::Bytes(data.to_vec()),
    };
    Ok(value)
}

/// Finds a record by its stable key.
pub fn find_record<'a>(records: &'a [DataRecord], key: &str) -> Option<&'a DataRecord> {
    records.iter().find(|r| r.key() == key)
}

/// Finds the "current" record (storage 0, tariff 0, subunit 0) with the
/// given canonical unit and function.
pub fn find_current<'a>(
    records: &'a [DataRecord],
    unit: Unit,
    function: DifFunction,
) -> Option<&'a DataRecord> {
    records
        .iter()
        .find(|r| r.unit == Some(unit) && r.function == function && r.is_current())
}

/// Finds the record holding the target-date reading: same unit, lowest
/// storage number greater than zero.
pub fn find_target<'a>(records: &'a [DataRecord], unit: Unit) -> Option<&'a DataRecord> {
    records
        .iter()
        .filter(|r| r.unit == Some(unit) && r.storage_nr > 0)
        .min_by_key(|r| r.storage_nr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dif_data_length_table() {
        let cases = [
            (0x00u8, Some(0)),
            (0x01, Some(1)),
            (0x02, Some(2)),
            (0x03, Some(3)),
            (0x04, Some(4)),
            (0x05, Some(4)),
            (0x06, Some(6)),
            (0x07, Some(8)),
            (0x09, Some(1)),
            (0x0A, Some(2)),
            (0x0B, Some(3)),
            (0x0C, Some(4)),
            (0x0D, None),
            (0x0E, Some(6)),
        ];
        for (dif, expected) in cases {
            assert_eq!(dif_data_length(dif).unwrap(), expected, "dif {dif:02X}");
        }
        assert!(dif_data_length(0x08).is_err());
        assert!(dif_data_length(0x0F).is_err());
    }

    #[test]
    fn test_parse_volume_record() {
        // 04 13: 32-bit integer, volume in litres -> m3 * 10^-3
        let area = [0x04, 0x13, 0x08, 0x19, 0x00, 0x00];
        let records = parse_records(&area).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.key(), "04_13");
        assert_eq!(r.unit, Some(Unit::M3));
        assert_eq!(r.exponent, -3);
        assert!((r.scaled_value().unwrap() - 6.408).abs() < 1e-9);
        assert!(r.is_current());
        assert_eq!(r.offset, 0..6);
    }

    #[test]
    fn test_parse_target_record_storage_one() {
        // 44 13: storage bit in DIF set -> storage_nr 1
        let area = [0x44, 0x13, 0x01, 0x00, 0x00, 0x00];
        let records = parse_records(&area).unwrap();
        assert_eq!(records[0].storage_nr, 1);
        assert_eq!(records[0].key(), "44_13");
        assert!(!records[0].is_current());
        assert!(find_target(&records, Unit::M3).is_some());
    }

    #[test]
    fn test_parse_bcd_record() {
        // 0C 13: 8-digit BCD volume in litres
        let area = [0x0C, 0x13, 0x48, 0x09, 0x66, 0x00];
        let records = parse_records(&area).unwrap();
        assert!((records[0].scaled_value().unwrap() - 660.948).abs() < 1e-9);
    }

    #[test]
    fn test_parse_max_flow_function() {
        // DIF 0x12: 16-bit integer with function field = maximum
        let area = [0x12, 0x3B, 0x2A, 0x00];
        let records = parse_records(&area).unwrap();
        assert_eq!(records[0].function, DifFunction::Maximum);
        assert_eq!(records[0].unit, Some(Unit::M3h));
        assert!(find_current(&records, Unit::M3h, DifFunction::Maximum).is_some());
    }

    #[test]
    fn test_vife_key_and_error_flags() {
        // 04 FD 17: 32-bit error flags
        let area = [0x04, 0xFD, 0x17, 0x00, 0x00, 0x00, 0x00];
        let records = parse_records(&area).unwrap();
        assert_eq!(records[0].key(), "04_FD17");
        assert_eq!(records[0].quantity, "Error flags");
        assert_eq!(records[0].scaled_value().unwrap(), 0.0);
    }

    #[test]
    fn test_unknown_vif_preserved() {
        // 02 FF 20: manufacturer specific VIF, still keyed and numeric
        let area = [0x02, 0xFF, 0x20, 0x71, 0x00];
        let records = parse_records(&area).unwrap();
        assert_eq!(records[0].key(), "02_FF20");
        assert_eq!(records[0].unit, None);
        assert_eq!(records[0].quantity, "unknown");
        match records[0].value {
            RecordValue::Numeric(v) => assert_eq!(v, 113.0),
            _ => panic!("expected numeric"),
        }
    }

    #[test]
    fn test_idle_filler_skipped() {
        let area = [0x2F, 0x2F, 0x04, 0x13, 0x01, 0x00, 0x00, 0x00, 0x2F];
        let records = parse_records(&area).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_manufacturer_specific_consumes_rest() {
        let area = [0x0F, 0xDE, 0xAD, 0xBE, 0xEF];
        let records = parse_records(&area).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].quantity, "Manufacturer specific");
        match &records[0].value {
            RecordValue::Bytes(b) => assert_eq!(b, &vec![0xDE, 0xAD, 0xBE, 0xEF]),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn test_premature_end() {
        let area = [0x04, 0x13, 0x01];
        assert!(matches!(
            parse_records(&area),
            Err(RecordError::PrematureEnd(_))
        ));
    }

    #[test]
    fn test_storage_tariff_from_dife() {
        // DIF 0x84 (ext), DIFE 0x10 -> tariff 1, storage 0
        let area = [0x84, 0x10, 0x13, 0x01, 0x00, 0x00, 0x00];
        let records = parse_records(&area).unwrap();
        assert_eq!(records[0].tariff, 1);
        assert_eq!(records[0].storage_nr, 0);
        assert_eq!(records[0].key(), "8410_13");
    }
}
