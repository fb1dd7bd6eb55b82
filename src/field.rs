//! Bit-exact encode/decode of typed FIX field values to/from their wire byte form.
//!
//! Grounded on `original_source/src/C++/FieldConvertors.cpp`. The original's
//! `DoubleConvertor::Proxy::generate` hand-rolls a SIMD/inline-asm digit
//! extraction loop; that has no idiomatic Rust counterpart and isn't part of
//! its observable contract, so the behavior here is reproduced through
//! `std::fmt`'s correctly-rounded, ties-to-even fixed-precision float
//! formatting instead.

use chrono::{NaiveDateTime, Timelike};

/// `10^15`: above this magnitude a `f64` has no representable fractional part,
/// matching `FieldConvertors.cpp`'s `threshold` constant.
const DOUBLE_THRESHOLD: f64 = 1_000_000_000_000_000.0;

/// Encode/decode for the FIX `int` field type: base-10, no leading zeros, no sign for positives.
pub struct IntConvertor;

impl IntConvertor {
    pub fn encode(value: i64) -> String {
        value.to_string()
    }

    pub fn decode(raw: &str) -> Option<i64> {
        raw.parse().ok()
    }
}

/// Encode/decode for the FIX `float`/`price`/`qty` family of decimal field types.
pub struct DoubleConvertor;

impl DoubleConvertor {
    /// Render `value` in fixed (non-exponential) decimal notation.
    ///
    /// `padded`, when `Some(n)`, is both the rounding precision and the
    /// zero-padding width of the fractional part (the FIX wire convention:
    /// a price of `1.50` round-trips byte-for-byte). When `None`, the
    /// fractional part is rounded to its shortest round-trippable
    /// representation and trailing zeros are stripped.
    pub fn encode(value: f64, padded: Option<usize>) -> String {
        if value.is_nan() {
            return "nan".to_string();
        }

        let negative = value.is_sign_negative() && value != 0.0;
        let magnitude = value.abs();

        let body = if magnitude >= DOUBLE_THRESHOLD {
            // Above this magnitude, f64 has no fractional precision left;
            // the original's "above threshold" branch just zero-pads.
            let whole = format!("{:.0}", magnitude);
            match padded {
                Some(p) if p > 0 => format!("{whole}.{}", "0".repeat(p)),
                _ => whole,
            }
        } else {
            match padded {
                Some(p) => format!("{:.*}", p, magnitude),
                None => format!("{magnitude}"),
            }
        };

        if negative {
            format!("-{body}")
        } else {
            body
        }
    }

    pub fn decode(raw: &str) -> Option<f64> {
        if raw == "nan" {
            return Some(f64::NAN);
        }
        raw.parse().ok()
    }
}

/// Encode/decode for the FIX `Boolean` field type: wire values are `"Y"`/`"N"`.
pub struct BoolConvertor;

impl BoolConvertor {
    pub fn encode(value: bool) -> &'static str {
        if value {
            "Y"
        } else {
            "N"
        }
    }

    pub fn decode(raw: &str) -> Option<bool> {
        match raw {
            "Y" => Some(true),
            "N" => Some(false),
            _ => None,
        }
    }
}

/// Encode/decode for the FIX `char` field type: exactly one ASCII byte.
pub struct CharConvertor;

impl CharConvertor {
    pub fn encode(value: char) -> String {
        value.to_string()
    }

    pub fn decode(raw: &str) -> Option<char> {
        let mut chars = raw.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            None
        } else {
            Some(c)
        }
    }
}

/// Encode/decode for `UTCTimestamp` fields: `YYYYMMDD-HH:MM:SS[.sss]`.
pub struct UtcTimestampConvertor;

impl UtcTimestampConvertor {
    pub fn encode(dt: &NaiveDateTime, with_millis: bool) -> String {
        if with_millis {
            format!(
                "{:04}{:02}{:02}-{:02}:{:02}:{:02}.{:03}",
                dt.format("%Y"),
                dt.format("%m"),
                dt.format("%d"),
                dt.hour(),
                dt.minute(),
                dt.second(),
                dt.and_utc().timestamp_subsec_millis()
            )
        } else {
            dt.format("%Y%m%d-%H:%M:%S").to_string()
        }
    }

    pub fn decode(raw: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(raw, "%Y%m%d-%H:%M:%S.%3f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y%m%d-%H:%M:%S"))
            .ok()
    }
}
