//! Saturating arithmetic on basic units.
//!
//! Horizontal and vertical quantities are plain `i32` basic units. Width and
//! position sums clamp at the representable range and warn instead of wrapping.

use crate::diagnostic::{Diagnostic, Diagnostics};

/// Add two quantities, clamping and warning on overflow.
pub fn add(a: i32, b: i32, quantity: &'static str, diagnostics: &Diagnostics) -> i32 {
    match a.checked_add(b) {
        Some(sum) => sum,
        None => {
            diagnostics.emit(Diagnostic::Saturated { quantity });
            a.saturating_add(b)
        }
    }
}

/// Subtract `b` from `a`, clamping and warning on overflow.
pub fn sub(a: i32, b: i32, quantity: &'static str, diagnostics: &Diagnostics) -> i32 {
    match a.checked_sub(b) {
        Some(diff) => diff,
        None => {
            diagnostics.emit(Diagnostic::Saturated { quantity });
            a.saturating_sub(b)
        }
    }
}

/// Sum an iterator of quantities, clamping and warning once on overflow.
pub fn sum<I>(values: I, quantity: &'static str, diagnostics: &Diagnostics) -> i32
where
    I: IntoIterator<Item = i32>,
{
    let mut total = 0i32;
    let mut saturated = false;
    for v in values {
        match total.checked_add(v) {
            Some(next) => total = next,
            None => {
                saturated = true;
                total = total.saturating_add(v);
            }
        }
    }
    if saturated {
        diagnostics.emit(Diagnostic::Saturated { quantity });
    }
    total
}

/// Sum an iterator of quantities, clamping silently at the `i32` range.
pub fn clamped_sum<I>(values: I) -> i32
where
    I: IntoIterator<Item = i32>,
{
    values.into_iter().fold(0i32, i32::saturating_add)
}

/// `value * num / den` computed in 64 bits and clamped back to `i32`.
pub fn scale(value: i32, num: i32, den: i32) -> i32 {
    if den == 0 {
        return 0;
    }
    let wide = i64::from(value) * i64::from(num) / i64::from(den);
    wide.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}
