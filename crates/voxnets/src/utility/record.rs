//! # Record shape summaries.
//!
//! Serializes a module record and replaces every numeric array by its shape,
//! giving a compact json view of the parameter tree.

use burn::prelude::Backend;
use burn::record::{HalfPrecisionSettings, Record};
use serde_json::{Map, Value};

fn nested_shape(values: &[Value]) -> Option<Vec<usize>> {
    match values.first() {
        None => Some(vec![0]),
        Some(first) if first.is_number() => Some(vec![values.len()]),
        Some(Value::Array(inner)) => {
            let inner_shape = nested_shape(inner)?;
            Some(core::iter::once(values.len()).chain(inner_shape).collect())
        }
        Some(_) => None,
    }
}

fn summarize_value(value: Value) -> Value {
    match value {
        Value::Array(values) => match nested_shape(&values) {
            Some(shape) => {
                let mut summary = Map::new();
                summary.insert("_shape".to_string(), Value::from(shape));
                Value::Object(summary)
            }
            None => Value::Array(values.into_iter().map(summarize_value).collect()),
        },
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .filter(|(key, value)| key != "bytes" && !value.is_null())
                .map(|(key, value)| {
                    let value = if key == "shape" {
                        value
                    } else {
                        summarize_value(value)
                    };
                    (key, value)
                })
                .collect(),
        ),
        value => value,
    }
}

/// Summarize a record as json, with tensors reduced to their shapes.
pub fn record_summary<B: Backend, R: Record<B>>(record: R) -> anyhow::Result<Value> {
    let item = record.into_item::<HalfPrecisionSettings>();
    Ok(summarize_value(serde_json::to_value(&item)?))
}

/// Pretty-printed [`record_summary`].
pub fn format_record_summary<B: Backend, R: Record<B>>(record: R) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(&record_summary::<B, R>(record)?)?)
}
