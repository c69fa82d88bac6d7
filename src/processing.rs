//! Small value cleaners used before loading scraped data.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{QuatiError, Result};

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("valid header regex"));

const MAGNITUDES: [(char, f64); 3] = [('k', 1e3), ('m', 1e6), ('b', 1e9)];

/// Expand abbreviated counts such as `"550.1K"` or `"10.3M"`.
///
/// Suffixed values are rounded to the nearest integer; plain numbers are
/// truncated.
pub fn parse_magnitude(raw: &str) -> Result<i64> {
    let text = raw.trim().to_lowercase();
    let invalid = || QuatiError::InvalidNumber(raw.to_string());

    for (suffix, multiplier) in MAGNITUDES {
        if let Some(number) = text.strip_suffix(suffix) {
            let value: f64 = number.trim().parse().map_err(|_| invalid())?;
            return whole_i64((value * multiplier).round()).ok_or_else(invalid);
        }
    }

    let value: f64 = text.parse().map_err(|_| invalid())?;
    whole_i64(value.trunc()).ok_or_else(invalid)
}

/// Exact `i64` for an integral float; `None` when non-finite or out of range.
pub(crate) fn whole_i64(x: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, hence the half-open range
    ((i64::MIN as f64)..(i64::MAX as f64))
        .contains(&x)
        .then_some(x as i64)
}

/// Turn a display label into a column identifier.
pub fn sanitize_header(label: &str, lowercase: bool) -> String {
    let replaced = NON_ALNUM.replace_all(label, "_");
    let trimmed = replaced.trim_matches('_');
    if lowercase {
        trimmed.to_lowercase()
    } else {
        trimmed.to_uppercase()
    }
}
