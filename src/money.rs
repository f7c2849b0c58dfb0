//! Money Conversion Module
//!
//! Conversion from the signed minor-unit representation carried on the queue
//! to the decimal strings the target API expects.
//! All amount formatting MUST go through this module.
//!
//! ## Internal Representation
//! - Amounts are `i64` minor units (cents for AUD), negative for debits
//! - The scale factor is `10^decimals` (2 for every currency the source bank issues)
//!
//! ## Usage
//! ```rust
//! use ledger_sync::money::{minor_to_decimal, format_minor};
//!
//! assert_eq!(minor_to_decimal(-2550, 2).to_string(), "-25.50");
//! assert_eq!(format_minor(-2550, 2), "-25.50");
//! ```

use rust_decimal::prelude::*;

use crate::core_types::MinorUnits;

/// Decimal places used by the source bank for all its currencies
pub const DEFAULT_DECIMALS: u32 = 2;

// ============================================================================
// Format: minor units → API string
// ============================================================================

/// Convert minor units to an exact `Decimal` value.
pub fn minor_to_decimal(value: MinorUnits, decimals: u32) -> Decimal {
    Decimal::new(value, decimals)
}

/// Convert minor units to a fixed-scale decimal string, sign preserved.
///
/// ```rust
/// use ledger_sync::money::format_minor;
/// assert_eq!(format_minor(-500, 2), "-5.00");
/// assert_eq!(format_minor(12345, 2), "123.45");
/// ```
pub fn format_minor(value: MinorUnits, decimals: u32) -> String {
    let decimal_value = minor_to_decimal(value, decimals);
    format!("{:.prec$}", decimal_value, prec = decimals as usize)
}
