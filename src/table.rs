use std::collections::HashSet;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{QuatiError, Result};

/// A single value of a [`Table`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Null,
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

/// Spreadsheet-friendly rendering; `Null` renders as an empty string.
impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(x) => write!(f, "{x}"),
            Cell::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Cell::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

/// Which duplicate survives in [`Table::drop_duplicates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keep {
    #[default]
    First,
    Last,
}

/// Column-oriented table. All columns have the same length.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a header and row-major text values.
    ///
    /// Short rows are padded with empty text, since the Sheets API trims
    /// trailing blanks. Rows longer than the header are rejected.
    pub fn from_rows(header: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        let width = header.len();
        let mut columns: Vec<Column> = header
            .into_iter()
            .map(|name| Column {
                name,
                values: Vec::with_capacity(rows.len()),
            })
            .collect();

        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() > width {
                return Err(QuatiError::Table(format!(
                    "row {idx} has {} values but the header has {width} columns",
                    row.len()
                )));
            }
            let mut values = row.into_iter();
            for column in columns.iter_mut() {
                column
                    .values
                    .push(Cell::Text(values.next().unwrap_or_default()));
            }
        }

        Ok(Self { columns })
    }

    /// Every row is data; columns are named by position.
    pub fn from_headerless_rows(rows: Vec<Vec<String>>) -> Result<Self> {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let header = (0..width).map(|i| i.to_string()).collect();
        Self::from_rows(header, rows)
    }

    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Cell>) -> Result<()> {
        if !self.columns.is_empty() && values.len() != self.height() {
            return Err(QuatiError::Table(format!(
                "column has {} values but the table has {} rows",
                values.len(),
                self.height()
            )));
        }
        self.columns.push(Column {
            name: name.into(),
            values,
        });
        Ok(())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn height(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0
    }

    pub fn row(&self, idx: usize) -> Option<Vec<&Cell>> {
        if idx >= self.height() {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[idx]).collect())
    }

    /// Row-major text grid of the values, without the header.
    pub fn to_grid(&self) -> Vec<Vec<String>> {
        (0..self.height())
            .map(|r| self.columns.iter().map(|c| c.values[r].to_string()).collect())
            .collect()
    }

    /// Header row followed by [`Table::to_grid`].
    pub fn to_grid_with_header(&self) -> Vec<Vec<String>> {
        let mut grid = Vec::with_capacity(self.height() + 1);
        grid.push(self.columns.iter().map(|c| c.name.clone()).collect());
        grid.extend(self.to_grid());
        grid
    }

    /// Render every value as text, `Null` included.
    pub fn cast_to_text(&mut self) {
        for column in self.columns.iter_mut() {
            for cell in column.values.iter_mut() {
                if !matches!(cell, Cell::Text(_)) {
                    *cell = Cell::Text(cell.to_string());
                }
            }
        }
    }

    /// Drop rows whose values in `subset` repeat an earlier (or later) row.
    pub fn drop_duplicates(&mut self, subset: &[String], keep: Keep) -> Result<()> {
        let keys: Vec<usize> = subset
            .iter()
            .map(|name| {
                self.columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| QuatiError::MissingColumn(name.clone()))
            })
            .collect::<Result<_>>()?;

        let height = self.height();
        let mut seen = HashSet::new();
        let mut retain = vec![false; height];
        let order: Box<dyn Iterator<Item = usize>> = match keep {
            Keep::First => Box::new(0..height),
            Keep::Last => Box::new((0..height).rev()),
        };
        for r in order {
            let key: Vec<String> = keys
                .iter()
                .map(|&k| self.columns[k].values[r].to_string())
                .collect();
            if seen.insert(key) {
                retain[r] = true;
            }
        }

        for column in self.columns.iter_mut() {
            let mut flags = retain.iter();
            column.values.retain(|_| *flags.next().unwrap_or(&false));
        }
        Ok(())
    }
}
