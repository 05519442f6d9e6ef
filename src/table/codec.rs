//! Payload file formats for cached tables
//!
//! Tabular payloads are column-major JSON compressed with zstd. Geospatial
//! payloads are GeoJSON feature collections. Both are written to a temporary
//! file and renamed into place.

use crate::error::{Result, RetraceError};
use crate::table::{Column, ColumnType, RecordSet};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::io::Write;
use std::path::Path;

/// zstd compression level for tabular payloads
const COMPRESSION_LEVEL: i32 = 3;

/// Foreign member carrying the column schema of a geospatial payload
const SCHEMA_MEMBER: &str = "retrace:schema";

/// Suffix of in-flight payload files
const TEMP_SUFFIX: &str = ".tmp";

/// Column name used when a GeoJSON file carries no schema
const DEFAULT_GEOMETRY_COLUMN: &str = "geom";

#[derive(Serialize, Deserialize)]
struct ColumnarPayload {
    columns: Vec<Column>,
    rows: usize,
    data: Vec<Vec<Value>>,
}

/// Write a record set as zstd-compressed column-major JSON
pub fn write_tabular(records: &RecordSet, path: &Path) -> Result<()> {
    let mut data: Vec<Vec<Value>> = vec![Vec::with_capacity(records.len()); records.columns().len()];
    for row in records.rows() {
        for (column, value) in data.iter_mut().zip(row) {
            column.push(value.clone());
        }
    }

    let payload = ColumnarPayload {
        columns: records.columns().to_vec(),
        rows: records.len(),
        data,
    };
    let json = serde_json::to_vec(&payload).map_err(|e| RetraceError::Json {
        source: e,
        context: "Failed to serialize tabular payload".to_string(),
    })?;
    let compressed = zstd::encode_all(&json[..], COMPRESSION_LEVEL).map_err(|e| RetraceError::Io {
        source: e,
        context: "Failed to compress tabular payload".to_string(),
    })?;

    write_atomic(path, &compressed)
}

/// Read a payload written by [`write_tabular`]
pub fn read_tabular(path: &Path) -> Result<RecordSet> {
    let bytes = read_file(path)?;
    let json = zstd::decode_all(&bytes[..]).map_err(|e| RetraceError::Io {
        source: e,
        context: format!("Failed to decompress tabular payload: {}", path.display()),
    })?;
    let payload: ColumnarPayload = serde_json::from_slice(&json).map_err(|e| RetraceError::Json {
        source: e,
        context: format!("Failed to parse tabular payload: {}", path.display()),
    })?;

    if payload.data.len() != payload.columns.len() {
        return Err(RetraceError::Storage(format!(
            "Tabular payload {} has {} columns of data for {} columns",
            path.display(),
            payload.data.len(),
            payload.columns.len()
        )));
    }

    let row_count = payload.rows;
    if payload.data.iter().any(|c| c.len() != row_count) {
        return Err(RetraceError::Storage(format!(
            "Tabular payload {} has columns that do not match its {} rows",
            path.display(),
            row_count
        )));
    }

    let mut columns_iter: Vec<std::vec::IntoIter<Value>> =
        payload.data.into_iter().map(Vec::into_iter).collect();
    let mut records = RecordSet::new(payload.columns);
    for _ in 0..row_count {
        let row = columns_iter
            .iter_mut()
            .map(|c| c.next().unwrap_or(Value::Null))
            .collect();
        records.push_row(row)?;
    }

    Ok(records)
}

/// Write a record set as a GeoJSON feature collection.
///
/// The first geometry column becomes each feature's geometry; every other
/// column goes into `properties`.
pub fn write_geospatial(records: &RecordSet, path: &Path) -> Result<()> {
    let geometry_idx = records
        .columns()
        .iter()
        .position(|c| c.ty == ColumnType::Geometry)
        .ok_or_else(|| {
            RetraceError::Storage("Geospatial payload requires a geometry column".to_string())
        })?;

    let features: Vec<Value> = records
        .rows()
        .iter()
        .map(|row| {
            let mut properties = Map::new();
            for (idx, (column, value)) in records.columns().iter().zip(row).enumerate() {
                if idx != geometry_idx {
                    properties.insert(column.name.clone(), value.clone());
                }
            }
            json!({
                "type": "Feature",
                "geometry": row[geometry_idx].clone(),
                "properties": properties,
            })
        })
        .collect();

    let collection = json!({
        "type": "FeatureCollection",
        SCHEMA_MEMBER: records.columns(),
        "features": features,
    });
    let bytes = serde_json::to_vec(&collection).map_err(|e| RetraceError::Json {
        source: e,
        context: "Failed to serialize geospatial payload".to_string(),
    })?;

    write_atomic(path, &bytes)
}

/// Read a GeoJSON feature collection into a record set.
///
/// Files without a schema member get a `geom` geometry column followed by
/// `json` columns for every property key, in first-seen order.
pub fn read_geospatial(path: &Path) -> Result<RecordSet> {
    let bytes = read_file(path)?;
    let mut collection: Value = serde_json::from_slice(&bytes).map_err(|e| RetraceError::Json {
        source: e,
        context: format!("Failed to parse geospatial payload: {}", path.display()),
    })?;

    if collection.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
        return Err(RetraceError::Storage(format!(
            "{} is not a GeoJSON FeatureCollection",
            path.display()
        )));
    }

    let features = match collection.get_mut("features").map(Value::take) {
        Some(Value::Array(features)) => features,
        _ => Vec::new(),
    };

    let columns = match collection.get_mut(SCHEMA_MEMBER).map(Value::take) {
        Some(schema) => serde_json::from_value(schema).map_err(|e| RetraceError::Json {
            source: e,
            context: format!("Invalid schema in geospatial payload: {}", path.display()),
        })?,
        None => infer_columns(&features),
    };

    let mut records = RecordSet::new(columns);
    for mut feature in features {
        let geometry = feature.get_mut("geometry").map(Value::take).unwrap_or(Value::Null);
        let properties = match feature.get_mut("properties").map(Value::take) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let row = records
            .columns()
            .iter()
            .map(|column| {
                if column.ty == ColumnType::Geometry && !properties.contains_key(&column.name) {
                    geometry.clone()
                } else {
                    properties.get(&column.name).cloned().unwrap_or(Value::Null)
                }
            })
            .collect();
        records.push_row(row)?;
    }

    Ok(records)
}

fn infer_columns(features: &[Value]) -> Vec<Column> {
    let mut columns = vec![Column::new(DEFAULT_GEOMETRY_COLUMN, ColumnType::Geometry)];
    for feature in features {
        if let Some(properties) = feature.get("properties").and_then(Value::as_object) {
            for key in properties.keys() {
                if !columns.iter().any(|c| &c.name == key) {
                    columns.push(Column::new(key.clone(), ColumnType::Json));
                }
            }
        }
    }
    columns
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| RetraceError::Io {
        source: e,
        context: format!("Failed to read payload file: {}", path.display()),
    })
}

/// Write to a uniquely named temp file beside `path`, sync, then rename
/// over `path`. Concurrent writers of the same path each rename a complete
/// file; the last rename wins.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| RetraceError::Storage(format!("Invalid payload path: {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| RetraceError::Io {
        source: e,
        context: format!("Failed to create parent directory: {}", parent.display()),
    })?;

    let mut prefix = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    prefix.push(".");
    let mut file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| RetraceError::Io {
            source: e,
            context: format!("Failed to create temp file in {}", parent.display()),
        })?;
    file.write_all(bytes).map_err(|e| RetraceError::Io {
        source: e,
        context: format!("Failed to write temp file: {}", file.path().display()),
    })?;
    file.as_file().sync_all().map_err(|e| RetraceError::Io {
        source: e,
        context: format!("Failed to sync temp file: {}", file.path().display()),
    })?;

    file.persist(path).map_err(|e| RetraceError::Io {
        context: format!(
            "Failed to rename temp file to final location: {} -> {}",
            e.file.path().display(),
            path.display()
        ),
        source: e.error,
    })?;
    Ok(())
}
