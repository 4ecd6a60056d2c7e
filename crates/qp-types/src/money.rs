//! Whole-dollar rounding and display helpers.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round to whole units, ties toward positive infinity (`-2.5 → -2`, `2.5 → 3`).
///
/// This is the rounding every risk figure goes through before it is stored.
/// Returns `None` only when `value` sits at the very top of the `Decimal` range.
pub fn round_half_up(value: Decimal) -> Option<Decimal> {
    value.checked_add(Decimal::new(5, 1)).map(|v| v.floor())
}

/// Format an amount as whole US dollars, e.g. `-$15,780`.
///
/// Fractions are rounded half away from zero; the sign precedes the symbol.
pub fn format_currency(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let digits = rounded.abs().trunc().normalize().to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        grouped.push('-');
    }
    grouped.push('$');

    let len = digits.len();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
