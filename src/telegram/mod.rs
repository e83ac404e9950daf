//! # Telegram Parsing
//!
//! One received wM-Bus frame. The link-layer header is decoded eagerly when
//! the telegram is constructed; the record area is extracted lazily, per
//! meter, because decryption depends on the meter's key.
//!
//! ## Frame layout
//!
//! ```text
//! ┌─────┬─────┬─────────┬─────────────────────┬─────┬────────────┬─────────┐
//! │  L  │  C  │ M-field │ A-field             │ CI  │ header     │ records │
//! │ (1) │ (1) │ (2, LE) │ id(4) ver(1) med(1) │ (1) │ (CI based) │ (rest)  │
//! └─────┴─────┴─────────┴─────────────────────┴─────┴────────────┴─────────┘
//! ```
//!
//! The bytes following CI depend on its value: a long header repeats the
//! address block before ACC/STS/CFG, a short header carries only the triple,
//! CI 0x78 goes straight to the records, and CI 0x8D is the short
//! extended-link-layer variant used by Kamstrup C1 meters (CC, ACC and a
//! two byte session word).

pub mod crypto;
pub mod encoding;
pub mod record;

use self::crypto::{AesKey, EncryptionMode};
use self::record::{parse_records, DataRecord};
use crate::error::MetersError;
use crate::util::hex::encode_hex;
use thiserror::Error;

/// Errors from the link-layer header parse.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelegramError {
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),

    #[error("Frame truncated inside CI 0x{ci:02X} header")]
    TruncatedHeader { ci: u8 },
}

/// How the bytes after the CI field are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// CI 0x78: records follow immediately.
    None,
    /// CI 0x7A: ACC, STS, CFG.
    Short,
    /// CI 0x72: repeated address block, then ACC, STS, CFG.
    Long,
    /// CI 0x8D: CC, ACC, session word.
    EllShort,
    /// Anything else: records are taken verbatim from the remaining bytes.
    Other,
}

/// One received wM-Bus frame with its decoded link-layer header.
#[derive(Debug, Clone)]
pub struct Telegram {
    pub raw: Vec<u8>,
    pub l_field: u8,
    pub c_field: u8,
    pub manufacturer: u16,
    /// Manufacturer unpacked to three ASCII letters, e.g. `KAM`.
    pub manufacturer_ascii: String,
    /// Meter address as a decimal digit string, e.g. `76348799`.
    pub id: String,
    pub version: u8,
    pub media: u8,
    pub ci_field: u8,
    pub acc: u8,
    pub sts: u8,
    pub cfg: u16,
    /// Session word of the ELL short header; zero otherwise.
    pub session: u16,
    pub header: HeaderKind,
    payload_offset: usize,
}

impl Telegram {
    /// Parse the link-layer header of a raw frame.
    ///
    /// The L-field is checked against the actual byte count but a mismatch
    /// is only logged: dongles differ in whether trailing CRC bytes are
    /// stripped, and simulation files routinely carry shortened frames.
    pub fn parse(raw: &[u8]) -> Result<Telegram, TelegramError> {
        if raw.len() < 11 {
            return Err(TelegramError::TooShort(raw.len()));
        }

        let l_field = raw[0];
        let c_field = raw[1];
        let manufacturer = u16::from_le_bytes([raw[2], raw[3]]);
        let id = format!("{:02x}{:02x}{:02x}{:02x}", raw[7], raw[6], raw[5], raw[4]);
        let version = raw[8];
        let media = raw[9];
        let ci_field = raw[10];

        if l_field as usize != raw.len() - 1 {
            log::debug!(
                "(telegram) L-field {} disagrees with frame length {}",
                l_field,
                raw.len() - 1
            );
        }

        let mut t = Telegram {
            raw: raw.to_vec(),
            l_field,
            c_field,
            manufacturer,
            manufacturer_ascii: manufacturer_to_ascii(manufacturer),
            id,
            version,
            media,
            ci_field,
            acc: 0,
            sts: 0,
            cfg: 0,
            session: 0,
            header: HeaderKind::None,
            payload_offset: 11,
        };

        let rest = &raw[11..];
        match ci_field {
            0x78 => {
                t.header = HeaderKind::None;
            }
            0x7A => {
                if rest.len() < 4 {
                    return Err(TelegramError::TruncatedHeader { ci: ci_field });
                }
                t.header = HeaderKind::Short;
                t.acc = rest[0];
                t.sts = rest[1];
                t.cfg = u16::from_le_bytes([rest[2], rest[3]]);
                t.payload_offset += 4;
            }
            0x72 => {
                if rest.len() < 12 {
                    return Err(TelegramError::TruncatedHeader { ci: ci_field });
                }
                // The repeated address block is trusted over the link-layer
                // A-field when they disagree
                t.id = format!(
                    "{:02x}{:02x}{:02x}{:02x}",
                    rest[3], rest[2], rest[1], rest[0]
                );
                t.manufacturer = u16::from_le_bytes([rest[4], rest[5]]);
                t.manufacturer_ascii = manufacturer_to_ascii(t.manufacturer);
                t.version = rest[6];
                t.media = rest[7];
                t.header = HeaderKind::Long;
                t.acc = rest[8];
                t.sts = rest[9];
                t.cfg = u16::from_le_bytes([rest[10], rest[11]]);
                t.payload_offset += 12;
            }
            0x8D => {
                if rest.len() < 4 {
                    return Err(TelegramError::TruncatedHeader { ci: ci_field });
                }
                t.header = HeaderKind::EllShort;
                // CC at rest[0] carries link control bits the receiver does
                // not act on
                t.acc = rest[1];
                t.session = u16::from_le_bytes([rest[2], rest[3]]);
                t.payload_offset += 4;
            }
            _ => {
                t.header = HeaderKind::Other;
            }
        }

        Ok(t)
    }

    /// The record area: ciphertext when the frame is encrypted.
    pub fn record_area(&self) -> &[u8] {
        &self.raw[self.payload_offset..]
    }

    /// The encryption mode announced by the configuration word.
    pub fn encryption_mode(&self) -> EncryptionMode {
        match self.header {
            HeaderKind::EllShort => EncryptionMode::EllCtr,
            _ => EncryptionMode::from_cfg(self.cfg),
        }
    }

    /// Decode the data records, decrypting with `key` when one is
    /// configured.
    ///
    /// ELL frames are only ciphered when the meter is keyed, so an ELL
    /// telegram with no key parses as plaintext. A mode 5 telegram with no
    /// key cannot be decoded at all.
    pub fn decode_records(&self, key: Option<&AesKey>) -> Result<Vec<DataRecord>, MetersError> {
        let area = self.record_area();
        let plain: Vec<u8> = match (self.encryption_mode(), key) {
            (EncryptionMode::None, _) => area.to_vec(),
            (EncryptionMode::EllCtr, None) => area.to_vec(),
            (EncryptionMode::EllCtr, Some(key)) => crypto::decrypt_ell(self, key)?,
            (EncryptionMode::Mode5Cbc, Some(key)) => crypto::decrypt_mode5(self, key)?,
            (EncryptionMode::Mode5Cbc, None) => {
                return Err(MetersError::DecryptFailed(format!(
                    "telegram from {} is encrypted (mode 5) but no key is configured",
                    self.id
                )));
            }
            (EncryptionMode::Unknown(mode), _) => {
                return Err(MetersError::DecryptFailed(format!(
                    "telegram from {} uses unsupported encryption mode {mode}",
                    self.id
                )));
            }
        };

        parse_records(&plain).map_err(|e| MetersError::DecodeFailed(e.to_string()))
    }

    /// The line format `--logtelegrams` emits, replayable through the
    /// simulator.
    pub fn to_simulation_line(&self) -> String {
        format!("telegram=|{}|", encode_hex(&self.raw).to_uppercase())
    }
}

/// Unpack the 5-bit packed manufacturer field to three ASCII letters.
pub fn manufacturer_to_ascii(m: u16) -> String {
    let a = ((m >> 10) & 0x1F) as u8 + 64;
    let b = ((m >> 5) & 0x1F) as u8 + 64;
    let c = (m & 0x1F) as u8 + 64;
    String::from_utf8_lossy(&[a, b, c]).into_owned()
}

/// Pack three ASCII letters into the 5-bit manufacturer field.
pub fn manufacturer_from_ascii(s: &str) -> Option<u16> {
    let bytes = s.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    Some(
        (u16::from(bytes[0] - 64) << 10) | (u16::from(bytes[1] - 64) << 5) | u16::from(bytes[2] - 64),
    )
}

/// Human readable name of a wM-Bus media code.
pub fn media_name(media: u8) -> &'static str {
    match media {
        0x02 => "electricity",
        0x03 => "gas",
        0x04 => "heat",
        0x06 => "warm water",
        0x07 => "water",
        0x08 => "heat cost allocation",
        0x0C => "heat (volume at inlet)",
        0x16 => "cold water",
        0x17 => "hot water",
        _ => "unknown",
    }
}

/// EN 13757 CRC-16 used for payload verification (poly 0x1021 reflected,
/// init 0x3791, no final complement).
pub fn crc16_en13757(data: &[u8]) -> u16 {
    const POLYNOMIAL: u16 = 0x8408;
    const INITIAL: u16 = 0x3791;

    let mut crc = INITIAL;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::hex::parse_hex_lenient;

    #[test]
    fn test_manufacturer_roundtrip() {
        let kam = manufacturer_from_ascii("KAM").unwrap();
        assert_eq!(kam, 0x2C2D);
        assert_eq!(manufacturer_to_ascii(kam), "KAM");
        assert_eq!(manufacturer_to_ascii(manufacturer_from_ascii("SEN").unwrap()), "SEN");
        assert!(manufacturer_from_ascii("kam").is_none());
        assert!(manufacturer_from_ascii("KAMX").is_none());
    }

    #[test]
    fn test_parse_ell_header() {
        // Kamstrup Multical 21 C1 telegram, unencrypted record area
        let raw =
            parse_hex_lenient("2A442D2C998734761B168D2087D078_04FD170000000002FD74DA11").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        assert_eq!(t.l_field, 0x2A);
        assert_eq!(t.c_field, 0x44);
        assert_eq!(t.manufacturer_ascii, "KAM");
        assert_eq!(t.id, "76348799");
        assert_eq!(t.version, 0x1B);
        assert_eq!(t.media, 0x16);
        assert_eq!(t.ci_field, 0x8D);
        assert_eq!(t.header, HeaderKind::EllShort);
        assert_eq!(t.acc, 0x87);
        assert_eq!(t.session, 0x78D0);
        assert_eq!(
            t.record_area(),
            &parse_hex_lenient("04FD170000000002FD74DA11").unwrap()[..]
        );
    }

    #[test]
    fn test_parse_short_header() {
        // CI 0x7A with ACC=0x55, STS=0, CFG=0 (no encryption)
        let raw = parse_hex_lenient("1E44AE4C4455223368077A55000000_041308190000").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        assert_eq!(t.header, HeaderKind::Short);
        assert_eq!(t.manufacturer_ascii, "SEN");
        assert_eq!(t.id, "33225544");
        assert_eq!(t.acc, 0x55);
        assert_eq!(t.cfg, 0);
        let records = t.decode_records(None).unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].scaled_value().unwrap() - 6.408).abs() < 1e-9);
    }

    #[test]
    fn test_parse_long_header_overrides_address() {
        // CI 0x72 repeats the address block; the repeated block wins
        let raw = parse_hex_lenient(
            "2744AE4C9999999968077299887766AE4C160755000000_041301000000",
        )
        .unwrap();
        let t = Telegram::parse(&raw).unwrap();
        assert_eq!(t.header, HeaderKind::Long);
        assert_eq!(t.id, "66778899");
        assert_eq!(t.version, 0x16);
        assert_eq!(t.media, 0x07);
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            Telegram::parse(&[0x00; 5]),
            Err(TelegramError::TooShort(5))
        ));
        let raw = parse_hex_lenient("1E44AE4C4455223368077A55").unwrap();
        assert!(matches!(
            Telegram::parse(&raw),
            Err(TelegramError::TruncatedHeader { ci: 0x7A })
        ));
    }

    #[test]
    fn test_mode5_without_key_is_decrypt_failure() {
        // CFG 0x0500 announces mode 5
        let raw = parse_hex_lenient("1E44AE4C4455223368077A5500000500_2F2F0413").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        assert!(matches!(
            t.decode_records(None),
            Err(MetersError::DecryptFailed(_))
        ));
    }

    #[test]
    fn test_simulation_line_roundtrip() {
        let raw =
            parse_hex_lenient("2A442D2C998734761B168D2087D078_04FD170000000002FD74DA11").unwrap();
        let t = Telegram::parse(&raw).unwrap();
        let line = t.to_simulation_line();
        assert!(line.starts_with("telegram=|2A442D2C"));
        assert!(line.ends_with('|'));
    }

    #[test]
    fn test_media_names() {
        assert_eq!(media_name(0x16), "cold water");
        assert_eq!(media_name(0x08), "heat cost allocation");
        assert_eq!(media_name(0xEE), "unknown");
    }

    #[test]
    fn test_crc16_known_vector() {
        // CRC of an empty slice is the initial value
        assert_eq!(crc16_en13757(&[]), 0x3791);
        // Stability check on a fixed vector
        let crc = crc16_en13757(&[0x04, 0x13, 0x08, 0x19, 0x00, 0x00]);
        assert_eq!(crc, crc16_en13757(&[0x04, 0x13, 0x08, 0x19, 0x00, 0x00]));
    }
}
