//! Koinu arithmetic and decimal-DOGE string conversion.
//!
//! 1 DOGE = 100,000,000 koinu. Conversions go through string arithmetic so a
//! balance never picks up binary-float drift on its way to or from display.

use crate::error::{Error, Result};

pub const KOINU_PER_DOGE: u64 = 100_000_000;

const DOGE_DECIMALS: usize = 8;

/// Parse a decimal-DOGE string (`"12"`, `"12.5"`, `"0.00000001"`) into koinu.
///
/// Rejects negative values, more than eight fractional digits, and anything
/// that would overflow a `u64`.
pub fn doge_to_koinu(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidAmount("empty amount".into()));
    }
    if s.starts_with('-') || s.starts_with('+') {
        return Err(Error::InvalidAmount(format!("signed amount: {s}")));
    }

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(Error::InvalidAmount(format!("not a number: {s}")));
    }
    if frac_part.len() > DOGE_DECIMALS {
        return Err(Error::InvalidAmount(format!(
            "more than {DOGE_DECIMALS} fractional digits: {s}"
        )));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(Error::InvalidAmount(format!("not a number: {s}")));
    }

    let whole: u64 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| Error::InvalidAmount(format!("integer part overflows: {s}")))?
    };

    // Pad the fraction out to eight digits so "5" means 50_000_000 koinu.
    let mut frac_digits = frac_part.to_string();
    while frac_digits.len() < DOGE_DECIMALS {
        frac_digits.push('0');
    }
    let frac: u64 = frac_digits
        .parse()
        .map_err(|_| Error::InvalidAmount(format!("bad fraction: {s}")))?;

    whole
        .checked_mul(KOINU_PER_DOGE)
        .and_then(|k| k.checked_add(frac))
        .ok_or_else(|| Error::InvalidAmount(format!("amount overflows: {s}")))
}

/// Format koinu as a decimal-DOGE string with trailing zeros trimmed.
pub fn koinu_to_doge(koinu: u64) -> String {
    let whole = koinu / KOINU_PER_DOGE;
    let frac = koinu % KOINU_PER_DOGE;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:08}");
    let frac = frac.trim_end_matches('0');
    format!("{whole}.{frac}")
}
