//! The `JSON` collation.
//!
//! View keys are stored as JSON text and ordered by their JSON-typed
//! semantics rather than their spelling: type rank first
//! (`null < false < true < number < string < array < object`), then a
//! structural comparison within the type. The storage layer registers
//! [`collate_json`] with the engine under the name `JSON` at open time.

use std::cmp::Ordering;

use serde_json::{Number, Value};

/// Compare two JSON texts under the `JSON` collation.
///
/// Inputs that fail to parse fall back to raw byte order, keeping the
/// comparator total no matter what ends up in an indexed column.
#[must_use]
pub fn collate_json(left: &str, right: &str) -> Ordering {
    match (
        serde_json::from_str::<Value>(left),
        serde_json::from_str::<Value>(right),
    ) {
        (Ok(a), Ok(b)) => compare_values(&a, &b),
        _ => left.as_bytes().cmp(right.as_bytes()),
    }
}

/// Structural comparison of two parsed JSON values.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Null, Value::Null) | (Value::Bool(_), Value::Bool(_)) => Ordering::Equal,
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        // Unicode code point order; for UTF-8 that is plain byte order.
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => compare_arrays(x, y),
        (Value::Object(x), Value::Object(y)) => {
            // Pair-wise over keys (sorted by the map), key first then value;
            // a strict prefix orders before the longer object.
            for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                let key = ka.cmp(kb);
                if key != Ordering::Equal {
                    return key;
                }
                let value = compare_values(va, vb);
                if value != Ordering::Equal {
                    return value;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => unreachable!("type ranks were equal"),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(0.0);
    let y = b.as_f64().unwrap_or(0.0);
    x.total_cmp(&y)
}

fn compare_arrays(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let element = compare_values(x, y);
        if element != Ordering::Equal {
            return element;
        }
    }
    a.len().cmp(&b.len())
}
