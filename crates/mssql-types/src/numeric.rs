//! Exact DECIMAL/NUMERIC values.
//!
//! SQL Server decimals carry up to 38 digits, more than the 28 that
//! [`rust_decimal::Decimal`] holds, so values are kept as a scaled `i128`
//! and converted on demand.

use std::fmt;

use rust_decimal::Decimal;

use crate::error::TypeError;

/// Largest precision SQL Server accepts for DECIMAL/NUMERIC.
pub const MAX_PRECISION: u8 = 38;

/// A scaled integer: `value / 10^scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Numeric {
    value: i128,
    scale: u8,
}

impl Numeric {
    /// Create a numeric from an unscaled value and a scale.
    pub fn new(value: i128, scale: u8) -> Result<Self, TypeError> {
        if scale > MAX_PRECISION {
            return Err(TypeError::InvalidDecimal(format!(
                "scale {scale} exceeds {MAX_PRECISION}"
            )));
        }
        Ok(Self { value, scale })
    }

    /// Unscaled integer value.
    pub fn value(&self) -> i128 {
        self.value
    }

    /// Number of digits after the decimal point.
    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// Convert to a [`Decimal`], failing when the value needs more than 28
    /// significant digits.
    pub fn to_decimal(&self) -> Result<Decimal, TypeError> {
        Decimal::try_from_i128_with_scale(self.value, u32::from(self.scale))
            .map_err(|_| TypeError::OutOfRange {
                target_type: "rust_decimal::Decimal",
            })
    }

    /// Integer part and fraction as `f64`. Lossy.
    pub fn to_f64(&self) -> f64 {
        self.value as f64 / 10f64.powi(i32::from(self.scale))
    }
}

impl From<Decimal> for Numeric {
    fn from(d: Decimal) -> Self {
        // Decimal scale is at most 28.
        Self {
            value: d.mantissa(),
            scale: d.scale() as u8,
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.value < 0 { "-" } else { "" };
        let digits = self.value.unsigned_abs().to_string();
        let scale = usize::from(self.scale);
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        if digits.len() <= scale {
            write!(f, "{sign}0.{digits:0>scale$}")
        } else {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{sign}{int}.{frac}")
        }
    }
}
