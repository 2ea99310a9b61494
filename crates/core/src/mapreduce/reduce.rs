//! The closed set of reducers applied to successful task results.

use cortex_api::*;

/// Reduce successful task results, in task order.
pub fn reduce(reducer: Reducer, results: &[serde_json::Value]) -> serde_json::Value {
    match reducer {
        Reducer::Collect => serde_json::Value::Array(results.to_vec()),
        Reducer::Sum => number(numeric(results).iter().sum()),
        Reducer::Average => {
            let nums = numeric(results);
            if nums.is_empty() {
                serde_json::json!(0)
            } else {
                number(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        Reducer::Concat => serde_json::Value::String(
            results.iter().map(stringify).collect::<Vec<_>>().concat(),
        ),
        Reducer::Count => serde_json::json!(results.len()),
        Reducer::Merge => {
            let mut out = serde_json::Map::new();
            for value in results {
                if let serde_json::Value::Object(map) = value {
                    out.extend(map.clone());
                }
            }
            serde_json::Value::Object(out)
        }
    }
}

/// Numeric coercion: numbers are kept, finite-parseable strings are
/// accepted, everything else is dropped.
fn numeric(results: &[serde_json::Value]) -> Vec<f64> {
    results
        .iter()
        .filter_map(|value| match value {
            serde_json::Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
            serde_json::Value::String(s) => {
                s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
            }
            _ => None,
        })
        .collect()
}

/// Render an f64 as an integer JSON number when it is one.
fn number(value: f64) -> serde_json::Value {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        serde_json::json!(value as i64)
    } else {
        serde_json::json!(value)
    }
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
