//! # Physical Units and Conversion
//!
//! A small closed dimensional table. Every quantity a meter emits is held in
//! its canonical unit (m3, kWh, degrees Celsius, kW); conversion to the units
//! requested with `--addconversion` happens only when a reading is printed.

use thiserror::Error;

/// Errors from the unit conversion table.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// The two units measure different physical bases.
    #[error("Cannot convert from {from} to {to}: different dimensions")]
    DimensionMismatch { from: &'static str, to: &'static str },

    /// The unit name is not in the closed table.
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),
}

/// The physical base of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Volume,
    Energy,
    Power,
    Temperature,
    Flow,
    Duration,
    /// Heat cost allocator units are dimensionless; no conversions exist.
    Hca,
}

/// The closed set of units the receiver can emit or convert between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    M3,
    Litre,
    Kwh,
    Mj,
    Gj,
    Kw,
    W,
    C,
    F,
    M3h,
    Lh,
    Second,
    Minute,
    Hour,
    Hca,
}

impl Unit {
    pub fn quantity(&self) -> Quantity {
        match self {
            Unit::M3 | Unit::Litre => Quantity::Volume,
            Unit::Kwh | Unit::Mj | Unit::Gj => Quantity::Energy,
            Unit::Kw | Unit::W => Quantity::Power,
            Unit::C | Unit::F => Quantity::Temperature,
            Unit::M3h | Unit::Lh => Quantity::Flow,
            Unit::Second | Unit::Minute | Unit::Hour => Quantity::Duration,
            Unit::Hca => Quantity::Hca,
        }
    }

    /// Suffix used in JSON keys and field headers, e.g. `total_m3`.
    pub fn suffix(&self) -> &'static str {
        match self {
            Unit::M3 => "m3",
            Unit::Litre => "l",
            Unit::Kwh => "kwh",
            Unit::Mj => "mj",
            Unit::Gj => "gj",
            Unit::Kw => "kw",
            Unit::W => "w",
            Unit::C => "c",
            Unit::F => "f",
            Unit::M3h => "m3h",
            Unit::Lh => "lh",
            Unit::Second => "s",
            Unit::Minute => "min",
            Unit::Hour => "h",
            Unit::Hca => "hca",
        }
    }

    /// Human readable unit, used by the hr output format.
    pub fn hr(&self) -> &'static str {
        match self {
            Unit::M3 => "m3",
            Unit::Litre => "l",
            Unit::Kwh => "kWh",
            Unit::Mj => "MJ",
            Unit::Gj => "GJ",
            Unit::Kw => "kW",
            Unit::W => "W",
            Unit::C => "\u{00b0}C",
            Unit::F => "\u{00b0}F",
            Unit::M3h => "m3/h",
            Unit::Lh => "l/h",
            Unit::Second => "s",
            Unit::Minute => "min",
            Unit::Hour => "h",
            Unit::Hca => "hca",
        }
    }

    /// Parse a unit name as accepted by `--addconversion`.
    pub fn parse(s: &str) -> Result<Unit, ConversionError> {
        match s.to_ascii_lowercase().as_str() {
            "m3" => Ok(Unit::M3),
            "l" | "litre" => Ok(Unit::Litre),
            "kwh" => Ok(Unit::Kwh),
            "mj" => Ok(Unit::Mj),
            "gj" => Ok(Unit::Gj),
            "kw" => Ok(Unit::Kw),
            "w" => Ok(Unit::W),
            "c" => Ok(Unit::C),
            "f" => Ok(Unit::F),
            "m3h" => Ok(Unit::M3h),
            "lh" => Ok(Unit::Lh),
            "s" => Ok(Unit::Second),
            "min" => Ok(Unit::Minute),
            "h" => Ok(Unit::Hour),
            "hca" => Ok(Unit::Hca),
            _ => Err(ConversionError::UnknownUnit(s.to_string())),
        }
    }

    /// Scale factor from this unit to the canonical unit of its base, and
    /// the affine offset applied before scaling. Temperature is the only
    /// affine base; everything else is linear.
    fn to_canonical(&self) -> (f64, f64) {
        match self {
            Unit::M3 => (1.0, 0.0),
            Unit::Litre => (0.001, 0.0),
            Unit::Kwh => (1.0, 0.0),
            Unit::Mj => (1.0 / 3.6, 0.0),
            Unit::Gj => (1000.0 / 3.6, 0.0),
            Unit::Kw => (1.0, 0.0),
            Unit::W => (0.001, 0.0),
            Unit::C => (1.0, 0.0),
            Unit::F => (5.0 / 9.0, -32.0),
            Unit::M3h => (1.0, 0.0),
            Unit::Lh => (0.001, 0.0),
            Unit::Second => (1.0 / 3600.0, 0.0),
            Unit::Minute => (1.0 / 60.0, 0.0),
            Unit::Hour => (1.0, 0.0),
            Unit::Hca => (1.0, 0.0),
        }
    }
}

/// Convert a value between two commensurable units.
///
/// Fails with `DimensionMismatch` when the bases differ. The table is closed;
/// there is no runtime registration.
pub fn convert(value: f64, from: Unit, to: Unit) -> Result<f64, ConversionError> {
    if from.quantity() != to.quantity() {
        return Err(ConversionError::DimensionMismatch {
            from: from.suffix(),
            to: to.suffix(),
        });
    }
    if from == to {
        return Ok(value);
    }
    let (ff, fo) = from.to_canonical();
    let (tf, to_off) = to.to_canonical();
    // via the canonical unit: canonical = (v + fo) * ff
    let canonical = (value + fo) * ff;
    Ok(canonical / tf - to_off)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kwh_to_gj() {
        let gj = convert(1000.0, Unit::Kwh, Unit::Gj).unwrap();
        assert!((gj - 3.6).abs() < 1e-9);
        // The factor the heat meters document: GJ = kWh * 0.0036
        let gj2 = convert(1.0, Unit::Kwh, Unit::Gj).unwrap();
        assert!((gj2 - 0.0036).abs() < 1e-12);
    }

    #[test]
    fn test_volume_roundtrip() {
        let l = convert(6.408, Unit::M3, Unit::Litre).unwrap();
        assert!((l - 6408.0).abs() < 1e-9);
        let back = convert(l, Unit::Litre, Unit::M3).unwrap();
        assert!((back - 6.408).abs() < 1e-9);
    }

    #[test]
    fn test_roundtrip_all_linear_pairs() {
        let pairs = [
            (Unit::M3, Unit::Litre),
            (Unit::Kwh, Unit::Gj),
            (Unit::Kwh, Unit::Mj),
            (Unit::Kw, Unit::W),
            (Unit::M3h, Unit::Lh),
            (Unit::Second, Unit::Hour),
            (Unit::Minute, Unit::Hour),
        ];
        for (a, b) in pairs {
            let v = 123.456789;
            let there = convert(v, a, b).unwrap();
            let back = convert(there, b, a).unwrap();
            assert!(
                ((back - v) / v).abs() < 1e-9,
                "{:?} -> {:?} roundtrip drifted: {back}",
                a,
                b
            );
        }
    }

    #[test]
    fn test_temperature_affine() {
        let f = convert(100.0, Unit::C, Unit::F).unwrap();
        assert!((f - 212.0).abs() < 1e-9);
        let c = convert(32.0, Unit::F, Unit::C).unwrap();
        assert!(c.abs() < 1e-9);
        let back = convert(convert(21.5, Unit::C, Unit::F).unwrap(), Unit::F, Unit::C).unwrap();
        assert!((back - 21.5).abs() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(matches!(
            convert(1.0, Unit::M3, Unit::Kwh),
            Err(ConversionError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            convert(1.0, Unit::Hca, Unit::Kwh),
            Err(ConversionError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_unit_names() {
        assert_eq!(Unit::parse("GJ").unwrap(), Unit::Gj);
        assert_eq!(Unit::parse("m3").unwrap(), Unit::M3);
        assert!(Unit::parse("furlongs").is_err());
    }
}
