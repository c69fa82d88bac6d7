use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{QuatiError, Result};
use crate::processing::whole_i64;
use crate::table::{Cell, Column, Table};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One column of a remote table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CastTarget {
    Bool,
    Float,
    Int,
    Text,
}

impl CastTarget {
    fn lookup(field_type: &str) -> Option<Self> {
        match field_type {
            "BOOLEAN" => Some(CastTarget::Bool),
            "FLOAT" => Some(CastTarget::Float),
            "INTEGER" => Some(CastTarget::Int),
            "OBJECT" | "STRING" => Some(CastTarget::Text),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CastTarget::Bool => "boolean",
            CastTarget::Float => "float",
            CastTarget::Int => "integer",
            CastTarget::Text => "text",
        }
    }
}

/// Coerce the columns of `table` to the types declared by `schema`.
///
/// Fields are applied in schema order. `DATE` values that do not parse
/// become `Null`; a `TIMESTAMP` column with any unparseable value is left
/// untouched. With `cast_ids_as_string`, any other field whose name contains
/// `"id"` becomes text whatever its declared type.
pub fn reconcile_with_schema(
    table: &mut Table,
    schema: &[SchemaField],
    cast_ids_as_string: bool,
) -> Result<()> {
    for field in schema {
        tracing::debug!(field = %field.name, field_type = %field.field_type, "Reconciling column");
        let column = table
            .column_mut(&field.name)
            .ok_or_else(|| QuatiError::MissingColumn(field.name.clone()))?;

        match field.field_type.as_str() {
            "DATE" => coerce_dates(column),
            "TIMESTAMP" => coerce_timestamps(column),
            _ if cast_ids_as_string && field.name.contains("id") => {
                cast_column(column, CastTarget::Text)?
            }
            other => {
                let target =
                    CastTarget::lookup(other).ok_or_else(|| QuatiError::UnknownSchemaType {
                        field: field.name.clone(),
                        field_type: other.to_string(),
                    })?;
                cast_column(column, target)?
            }
        }
    }
    Ok(())
}

fn coerce_dates(column: &mut Column) {
    for cell in column.values.iter_mut() {
        *cell = match std::mem::replace(cell, Cell::Null) {
            Cell::Text(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                .map(Cell::Date)
                .unwrap_or(Cell::Null),
            Cell::Date(d) => Cell::Date(d),
            Cell::Timestamp(ts) => Cell::Date(ts.date()),
            _ => Cell::Null,
        };
    }
}

/// `YYYY-MM-DD HH:MM:SS:ffffff` with one to six fraction digits.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let (base, fraction) = raw.trim().rsplit_once(':')?;
    if fraction.is_empty() || fraction.len() > 6 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let micros: u32 = format!("{fraction:0<6}").parse().ok()?;
    NaiveDateTime::parse_from_str(base, TIMESTAMP_FORMAT)
        .ok()?
        .with_nanosecond(micros * 1_000)
}

fn coerce_timestamps(column: &mut Column) {
    let parsed: Option<Vec<Cell>> = column
        .values
        .iter()
        .map(|cell| match cell {
            Cell::Null => Some(Cell::Null),
            Cell::Text(s) if s.trim().is_empty() => Some(Cell::Null),
            Cell::Text(s) => parse_timestamp(s).map(Cell::Timestamp),
            Cell::Timestamp(ts) => Some(Cell::Timestamp(*ts)),
            Cell::Date(d) => d.and_hms_opt(0, 0, 0).map(Cell::Timestamp),
            _ => None,
        })
        .collect();

    match parsed {
        Some(values) => column.values = values,
        None => tracing::debug!(column = %column.name, "Timestamp parse failed, column left as is"),
    }
}

/// All or nothing: on failure the column keeps its original values.
fn cast_column(column: &mut Column, target: CastTarget) -> Result<()> {
    let cast = column
        .values
        .iter()
        .map(|cell| cast_cell(cell.clone(), target))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|value| QuatiError::Cast {
            column: column.name.clone(),
            value,
            target: target.name(),
        })?;
    column.values = cast;
    Ok(())
}

/// On failure, returns the rendered value that could not be cast.
fn cast_cell(cell: Cell, target: CastTarget) -> std::result::Result<Cell, String> {
    if target == CastTarget::Text {
        return Ok(Cell::Text(cell.to_string()));
    }
    match cell {
        Cell::Null => Ok(Cell::Null),
        Cell::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(Cell::Null);
            }
            match target {
                CastTarget::Bool => match trimmed.to_ascii_lowercase().as_str() {
                    "true" | "t" | "yes" | "y" | "1" => Ok(Cell::Bool(true)),
                    "false" | "f" | "no" | "n" | "0" => Ok(Cell::Bool(false)),
                    _ => Err(s),
                },
                CastTarget::Float => trimmed.parse().map(Cell::Float).map_err(|_| s),
                CastTarget::Int => {
                    if let Ok(i) = trimmed.parse::<i64>() {
                        return Ok(Cell::Int(i));
                    }
                    match trimmed.parse::<f64>() {
                        Ok(x) if x.fract() == 0.0 => whole_i64(x).map(Cell::Int).ok_or(s),
                        _ => Err(s),
                    }
                }
                CastTarget::Text => Ok(Cell::Text(s)),
            }
        }
        Cell::Bool(b) => Ok(match target {
            CastTarget::Float => Cell::Float(if b { 1.0 } else { 0.0 }),
            CastTarget::Int => Cell::Int(b as i64),
            _ => Cell::Bool(b),
        }),
        Cell::Int(i) => Ok(match target {
            CastTarget::Bool => Cell::Bool(i != 0),
            CastTarget::Float => Cell::Float(i as f64),
            _ => Cell::Int(i),
        }),
        Cell::Float(x) => match target {
            CastTarget::Bool => Ok(Cell::Bool(x != 0.0)),
            CastTarget::Int => whole_i64(x.trunc()).map(Cell::Int).ok_or_else(|| x.to_string()),
            _ => Ok(Cell::Float(x)),
        },
        other @ (Cell::Date(_) | Cell::Timestamp(_)) => Err(other.to_string()),
    }
}
