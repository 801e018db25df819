// 🔀 Property Merger - Type-aware diff/merge over nested property bags
//
// Rules:
// - Never delete a key the target already has (monotonic)
// - Never introduce empty placeholders
// - Same value in a different representation is NOT a change
//   (2 vs 2.0, "2024-01-01T00:00:00Z" vs "2024-01-01T01:00:00+01:00")
// - When in doubt, overwrite: newest data wins

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

/// Default merge depth for property bags
pub const DEFAULT_MERGE_DEPTH: usize = 5;

/// Locations carry deeper GeoJSON-ish structures
pub const LOCATION_MERGE_DEPTH: usize = 10;

// ============================================================================
// MERGE
// ============================================================================

/// Merge `source` into `target`, returning true if `target` changed.
///
/// Nested maps are merged key by key while `max_depth` remains; below that
/// they are compared as whole values.
pub fn merge_properties(
    target: &mut Map<String, Value>,
    source: &Map<String, Value>,
    max_depth: usize,
) -> bool {
    let mut changed = false;

    for (key, incoming) in source {
        match target.get_mut(key) {
            None => {
                if is_empty_value(incoming) {
                    continue;
                }
                target.insert(key.clone(), incoming.clone());
                changed = true;
            }
            Some(existing) => {
                if let (Value::Object(existing_map), Value::Object(incoming_map)) =
                    (&mut *existing, incoming)
                {
                    if max_depth > 0 {
                        changed |= merge_properties(existing_map, incoming_map, max_depth - 1);
                        continue;
                    }
                }
                if !values_equivalent(existing, incoming) {
                    *existing = incoming.clone();
                    changed = true;
                }
            }
        }
    }

    changed
}

/// Null, "", [] and {} never create a key on their own
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

// ============================================================================
// EQUIVALENCE
// ============================================================================

/// The one place where loose cross-representation equality is allowed.
///
/// - numbers: equal by exact decimal value
/// - strings: equal if identical, or if both parse as the same instant/interval
/// - arrays: element-wise with this same function
/// - maps: same keys, values compared with this same function
/// - anything else: structural equality
///
/// Anything that fails to parse is "not equal".
pub fn values_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equivalent(x, y),
        (Value::String(x), Value::String(y)) => x == y || timestamps_equivalent(x, y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equivalent(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).is_some_and(|y| values_equivalent(x, y)))
        }
        _ => a == b,
    }
}

fn numbers_equivalent(x: &Number, y: &Number) -> bool {
    match (canonical_decimal(&x.to_string()), canonical_decimal(&y.to_string())) {
        (Some(cx), Some(cy)) => cx == cy,
        _ => false,
    }
}

/// Decimal text → (negative, significant digits, power of ten).
///
/// value = ±digits × 10^scale, digits without leading or trailing zeros.
/// Zero is always (false, "", 0).
fn canonical_decimal(text: &str) -> Option<(bool, String, i64)> {
    let text = text.trim();
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => (&unsigned[..pos], unsigned[pos + 1..].parse::<i64>().ok()?),
        None => (unsigned, 0),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut digits: String = int_part.chars().chain(frac_part.chars()).collect();
    let mut scale = exponent.checked_sub(frac_part.len() as i64)?;

    let leading = digits.len() - digits.trim_start_matches('0').len();
    digits.drain(..leading);
    if digits.is_empty() {
        return Some((false, String::new(), 0));
    }

    let trimmed_len = digits.trim_end_matches('0').len();
    scale = scale.checked_add((digits.len() - trimmed_len) as i64)?;
    digits.truncate(trimmed_len);

    Some((negative, digits, scale))
}

fn timestamps_equivalent(x: &str, y: &str) -> bool {
    match (parse_time_text(x), parse_time_text(y)) {
        (Some(tx), Some(ty)) => tx == ty,
        _ => false,
    }
}

/// Instant (`t`) or interval (`start/end`), as UTC
fn parse_time_text(text: &str) -> Option<(DateTime<Utc>, Option<DateTime<Utc>>)> {
    let parse = |s: &str| {
        DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    };
    match text.split_once('/') {
        Some((start, end)) => Some((parse(start)?, Some(parse(end)?))),
        None => Some((parse(text)?, None)),
    }
}

// ============================================================================
// TESTS
// ============================================================================
