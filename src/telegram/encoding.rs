//! # Record Data Encoding
//!
//! Decoders for the primitive value encodings of EN 13757-3 data records:
//! binary-coded decimal, little-endian two's complement integers, 32-bit
//! reals, length-prefixed variable data and the compound date types.
//! Multi-byte wireless records are LSB first.

use chrono::{NaiveDate, NaiveDateTime};
use nom::{
    bytes::complete::take,
    combinator::map,
    number::complete::{le_f32, le_i16, le_i32, le_i64, le_i8},
    IResult,
};

/// Decodes a BCD value of `len` bytes, LSB first, two digits per byte.
pub fn decode_bcd(input: &[u8], len: usize) -> IResult<&[u8], u64> {
    let (rest, bytes) = take(len)(input)?;
    let mut value = 0u64;
    let mut multiplier = 1u64;
    for &byte in bytes {
        let lo = byte & 0x0F;
        let hi = byte >> 4;
        if lo > 9 || hi > 9 {
            return Err(nom::Err::Error(nom::error::Error::new(
                rest,
                nom::error::ErrorKind::Verify,
            )));
        }
        value += u64::from(lo) * multiplier;
        multiplier *= 10;
        value += u64::from(hi) * multiplier;
        multiplier *= 10;
    }
    Ok((rest, value))
}

/// Decodes a little-endian signed integer of 1, 2, 3, 4, 6 or 8 bytes.
pub fn decode_int(input: &[u8], size: usize) -> IResult<&[u8], i64> {
    match size {
        1 => map(le_i8, i64::from)(input),
        2 => map(le_i16, i64::from)(input),
        3 => {
            let (rest, b) = take(3usize)(input)?;
            let raw = (i32::from(b[2]) << 16) | (i32::from(b[1]) << 8) | i32::from(b[0]);
            // sign extend from 24 bits
            let value = (raw << 8) >> 8;
            Ok((rest, i64::from(value)))
        }
        4 => map(le_i32, i64::from)(input),
        6 => {
            let (rest, b) = take(6usize)(input)?;
            let mut raw = 0i64;
            for (i, &byte) in b.iter().enumerate() {
                raw |= i64::from(byte) << (8 * i);
            }
            let value = (raw << 16) >> 16;
            Ok((rest, value))
        }
        8 => le_i64(input),
        _ => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

/// Decodes a 32-bit little-endian real.
pub fn decode_real(input: &[u8]) -> IResult<&[u8], f64> {
    map(le_f32, f64::from)(input)
}

/// Decodes a variable-length text value. M-Bus strings are transmitted in
/// reverse character order.
pub fn decode_lvar_text(src: &[u8]) -> String {
    src.iter().rev().map(|&b| b as char).collect()
}

/// Decodes a type G compound date (CP16).
pub fn decode_type_g_date(b: &[u8]) -> Option<NaiveDate> {
    if b.len() < 2 {
        return None;
    }
    let day = u32::from(b[0] & 0x1F);
    let month = u32::from(b[1] & 0x0F);
    let year = 100 + (i32::from((b[0] & 0xE0) >> 5) | i32::from((b[1] & 0xF0) >> 1));
    NaiveDate::from_ymd_opt(1900 + year, month, day)
}

/// Decodes a type F compound date and time (CP32).
pub fn decode_type_f_datetime(b: &[u8]) -> Option<NaiveDateTime> {
    if b.len() < 4 {
        return None;
    }
    if (b[0] & 0x80) != 0 {
        return None; // invalid-time flag
    }
    let minute = u32::from(b[0] & 0x3F);
    let hour = u32::from(b[1] & 0x1F);
    let day = u32::from(b[2] & 0x1F);
    let month = u32::from(b[3] & 0x0F);
    let year = 100 + (i32::from((b[2] & 0xE0) >> 5) | i32::from((b[3] & 0xF0) >> 1));
    NaiveDate::from_ymd_opt(1900 + year, month, day)?.and_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bcd_lsb_first() {
        // 12345678 encoded LSB first: 78 56 34 12
        let (_, v) = decode_bcd(&[0x78, 0x56, 0x34, 0x12], 4).unwrap();
        assert_eq!(v, 12345678);
    }

    #[test]
    fn test_decode_bcd_rejects_hex_digits() {
        assert!(decode_bcd(&[0x1A, 0x00], 2).is_err());
    }

    #[test]
    fn test_decode_bcd_six_bytes() {
        let (_, v) = decode_bcd(&[0x99, 0x99, 0x99, 0x99, 0x99, 0x99], 6).unwrap();
        assert_eq!(v, 999_999_999_999);
    }

    #[test]
    fn test_decode_int_sizes() {
        assert_eq!(decode_int(&[0xFF], 1).unwrap().1, -1);
        assert_eq!(decode_int(&[0x2C, 0x01], 2).unwrap().1, 300);
        assert_eq!(decode_int(&[0xFF, 0xFF, 0xFF], 3).unwrap().1, -1);
        assert_eq!(decode_int(&[0x40, 0xE2, 0x01, 0x00], 4).unwrap().1, 123456);
        assert_eq!(decode_int(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x80], 6).unwrap().1, -140_737_488_355_328);
    }

    #[test]
    fn test_decode_int_bad_size() {
        assert!(decode_int(&[0x00; 8], 5).is_err());
    }

    #[test]
    fn test_decode_real() {
        let bytes = 1.5f32.to_le_bytes();
        let (_, v) = decode_real(&bytes).unwrap();
        assert!((v - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_lvar_text_is_reversed() {
        assert_eq!(decode_lvar_text(b"MAK"), "KAM");
    }

    #[test]
    fn test_type_g_date() {
        // 2018-12-31: b0[4:0] = day, b1[3:0] = month,
        // b0[7:5] | b1[7:4] = years since 2000
        let yy = 18u8;
        let b0 = ((yy & 0x07) << 5) | 31;
        let b1 = ((yy & 0x78) << 1) | 12;
        let date = decode_type_g_date(&[b0, b1]).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2018, 12, 31).unwrap());
    }

    #[test]
    fn test_type_f_invalid_flag() {
        assert!(decode_type_f_datetime(&[0x80, 0x00, 0x21, 0x0C]).is_none());
    }
}
