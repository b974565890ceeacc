//! Prints the contents of snapshot files.

use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use objstash_service::caching::snapshot::{self, SnapshotEntry};
use objstash_service::codec::{self, DecodeOptions};
use objstash_service::config::Config;
use objstash_service::types::{AnyTypeResolver, Object, Value};
use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Table, row};
use serde::Serialize;
use serde_json::json;

use crate::cli::OutputFormat;

/// The longest value summary shown in a table row.
const MAX_SUMMARY_LEN: usize = 60;

/// Reads the snapshot at `path` and renders its entries in the given format.
pub fn inspect(path: &Path, config: &Config, format: OutputFormat) -> Result<String> {
    let entries = snapshot::read(path)?;
    tracing::debug!(entries = entries.len(), "read snapshot");

    let options = DecodeOptions::from(&config.store);
    let decoded: Vec<_> = entries
        .iter()
        .map(|entry| InspectedEntry::decode(entry, &options))
        .collect();

    Ok(match format {
        OutputFormat::Table => render_table(&decoded),
        OutputFormat::Json => render_json(&decoded)?,
        OutputFormat::Debug => render_debug(&decoded),
    })
}

struct InspectedEntry<'a> {
    entry: &'a SnapshotEntry,
    value: Result<Value, String>,
}

impl<'a> InspectedEntry<'a> {
    fn decode(entry: &'a SnapshotEntry, options: &DecodeOptions) -> Self {
        let value = codec::decode(&entry.bytes, &AnyTypeResolver, options)
            .map(|decoded| decoded.value)
            .map_err(|err| err.to_string());
        Self { entry, value }
    }

    fn ttl(&self) -> String {
        match self.entry.ttl {
            Some(ttl) => humantime::format_duration(Duration::from_secs(ttl.as_secs())).to_string(),
            None => "-".into(),
        }
    }
}

fn render_table(entries: &[InspectedEntry<'_>]) -> String {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "Key", "TTL", "Size", "Kind", "Value"]);

    for inspected in entries {
        let (kind, summary) = match &inspected.value {
            Ok(value) => (value.kind(), summarize(value)),
            Err(err) => ("error", err.clone()),
        };
        table.add_row(row![
            inspected.entry.key,
            inspected.ttl(),
            r->inspected.entry.bytes.len(),
            kind,
            summary
        ]);
    }

    table.to_string()
}

/// A single line summary of `value`, cut off at [`MAX_SUMMARY_LEN`] characters.
fn summarize(value: &Value) -> String {
    let summary = format!("{value:?}");
    if summary.chars().count() <= MAX_SUMMARY_LEN {
        return summary;
    }
    let mut short: String = summary.chars().take(MAX_SUMMARY_LEN - 1).collect();
    short.push('…');
    short
}

#[derive(Serialize)]
struct JsonEntry {
    key: String,
    ttl_ms: Option<u128>,
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn render_json(entries: &[InspectedEntry<'_>]) -> Result<String> {
    let entries: Vec<_> = entries
        .iter()
        .map(|inspected| {
            let (value, error) = match &inspected.value {
                Ok(value) => (Some(to_json(value)), None),
                Err(err) => (None, Some(err.clone())),
            };
            JsonEntry {
                key: inspected.entry.key.to_string(),
                ttl_ms: inspected.entry.ttl.map(|ttl| ttl.as_millis()),
                size: inspected.entry.bytes.len(),
                value,
                error,
            }
        })
        .collect();

    let mut output = serde_json::to_string_pretty(&entries)?;
    output.push('\n');
    Ok(output)
}

/// Converts a value into JSON.
///
/// Objects become JSON objects with an `$id` and a `$type` member. Every repeated occurrence of
/// an object, including cycles, is written as `{"$ref": id}`.
fn to_json(value: &Value) -> serde_json::Value {
    fn convert(value: &Value, seen: &mut Vec<Object>) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) => json!(f),
            Value::String(s) => json!(&**s),
            Value::Bytes(b) => json!(b.to_vec()),
            Value::List(items) => items.iter().map(|v| convert(v, seen)).collect(),
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| (k.to_string(), convert(v, seen)))
                .collect::<serde_json::Map<_, _>>()
                .into(),
            Value::Object(object) => {
                if let Some(id) = seen.iter().position(|o| o.ptr_eq(object)) {
                    return json!({ "$ref": id });
                }
                let id = seen.len();
                seen.push(object.clone());

                let mut map = serde_json::Map::new();
                map.insert("$id".into(), json!(id));
                map.insert("$type".into(), json!(object.type_name()));
                for (name, value) in object.fields() {
                    map.insert(name.to_string(), convert(&value, seen));
                }
                map.into()
            }
            Value::Resource(r) => json!({ "$resource": &*r.kind, "id": r.id }),
        }
    }
    convert(value, &mut Vec::new())
}

fn render_debug(entries: &[InspectedEntry<'_>]) -> String {
    let mut output = String::new();
    for inspected in entries {
        match &inspected.value {
            Ok(value) => writeln!(output, "{}: {value:#?}", inspected.entry.key).unwrap(),
            Err(err) => writeln!(output, "{}: <{err}>", inspected.entry.key).unwrap(),
        }
    }
    output
}
