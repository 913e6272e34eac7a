//! Shape normalizers turning wire payloads into flat, tagged record lists.

use crate::identity::IdentityContext;
use crate::models::{Measurement, PayloadShape, Record, TelemetryRecord};
use common::{Error, Result};
use serde_json::Value;
use tracing::debug;

/// Splits a `{"system_id": ..., "data": ...}` envelope. Payloads without the
/// envelope are returned untouched.
pub fn unwrap_envelope(payload: Value) -> (Value, Option<String>) {
    match payload {
        Value::Object(mut map) if map.contains_key("data") && map.contains_key("system_id") => {
            let system_id = map
                .get("system_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            let data = map.remove("data").unwrap_or(Value::Null);
            (data, system_id)
        }
        other => (other, None),
    }
}

/// Keeps non-empty objects, dropping nulls and anything that is not a record.
fn into_records(items: Vec<Value>) -> Vec<Record> {
    let total = items.len();
    let records: Vec<Record> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) if !map.is_empty() => Some(map),
            _ => None,
        })
        .collect();
    if records.len() < total {
        debug!(dropped = total - records.len(), "Dropped empty or non-object records");
    }
    records
}

fn list_or_single(payload: Value, context: &str) -> Result<Vec<Value>> {
    match payload {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(vec![Value::Object(map)]),
        other => Err(Error::Extraction(format!(
            "{}: expected an object or array, found {}",
            context,
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalizes a performance payload to a record list according to the
/// shape of its measurement. No identity tags are added.
pub fn normalize_performance(shape: PayloadShape, payload: Value) -> Result<Vec<Record>> {
    let items = match (shape, payload) {
        (PayloadShape::WrappedObject | PayloadShape::StatisticsArray, Value::Object(mut map))
            if map.contains_key("statistics") =>
        {
            match map.remove("statistics").unwrap_or(Value::Null) {
                Value::Array(items) => items,
                Value::Object(inner) => vec![Value::Object(inner)],
                Value::Null => Vec::new(),
                other => {
                    return Err(Error::Extraction(format!(
                        "statistics field holds a {}",
                        type_name(&other)
                    )));
                }
            }
        }
        (_, payload) => list_or_single(payload, "performance payload")?,
    };
    Ok(into_records(items))
}

/// Extracts and tags performance records for `measurement`.
pub fn extract_performance(
    measurement: &Measurement,
    payload: Value,
    identity: &IdentityContext,
    wwn: Option<&str>,
) -> Result<Vec<Record>> {
    let mut records = normalize_performance(measurement.shape, payload)?;
    identity.inject_system_context(&mut records, wwn)?;
    Ok(records)
}

/// Extracts and tags configuration records, unwrapping the
/// `{data, system_id}` envelope when present.
pub fn extract_configuration(
    payload: Value,
    identity: &IdentityContext,
    wwn: Option<&str>,
) -> Result<Vec<Record>> {
    let (payload, _) = unwrap_envelope(payload);
    let mut records = into_records(list_or_single(payload, "configuration payload")?);
    identity.inject_system_context(&mut records, wwn)?;
    Ok(records)
}

/// Extracts and tags event or environmental records.
pub fn extract_records(
    payload: Value,
    identity: &IdentityContext,
    wwn: Option<&str>,
) -> Result<Vec<Record>> {
    let (payload, _) = unwrap_envelope(payload);
    let mut records = into_records(list_or_single(payload, "payload")?);
    identity.inject_system_context(&mut records, wwn)?;
    Ok(records)
}

/// Validates records against their measurement schema. Returns the records
/// that decoded, their typed form, and one message per rejected record.
pub fn decode_records(
    measurement: &str,
    records: Vec<Record>,
) -> (Vec<(Record, TelemetryRecord)>, Vec<String>) {
    let mut decoded = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for record in records {
        match TelemetryRecord::decode(measurement, &record) {
            Ok(typed) => decoded.push((record, typed)),
            Err(e) => rejected.push(e.to_string()),
        }
    }
    (decoded, rejected)
}
