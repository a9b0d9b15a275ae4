//! Typed tabular query results
//!
//! A `ResultTable` is an immutable, column-oriented view over one query's
//! output. Columns carry a declared semantic type and every cell is
//! validated against it at parse time; a mismatch is a parse error, never a
//! silent coercion.

use super::error::{Result, TapError};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared semantic type of a result column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Int,
    Float,
    Bool,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One column of a result schema: name plus declared type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ctype: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ctype: ColumnType) -> Self {
        Column {
            name: name.into(),
            ctype,
        }
    }
}

/// A single cell value. `Null` represents an empty cell, which TAP services
/// emit for missing measurements.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view: integers widen to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(v) => write!(f, "{}", v),
            // Keep a decimal point on whole floats so the text stays
            // recognizable as a float when read back.
            Value::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Null => Ok(()),
        }
    }
}

/// Column selector: by name or by positional index
#[derive(Debug, Clone)]
pub enum ColumnRef {
    Name(String),
    Index(usize),
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::Name(name.to_string())
    }
}

impl From<String> for ColumnRef {
    fn from(name: String) -> Self {
        ColumnRef::Name(name)
    }
}

impl From<usize> for ColumnRef {
    fn from(index: usize) -> Self {
        ColumnRef::Index(index)
    }
}

/// Immutable, typed table of query results
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl ResultTable {
    /// Build a table, validating the schema invariants: unique column names
    /// and every row's arity equal to the column count.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Result<Self> {
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(TapError::InvalidArgument(format!(
                    "duplicate column name '{}'",
                    col.name
                )));
            }
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(TapError::InvalidArgument(format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    columns.len()
                )));
            }
        }
        Ok(ResultTable { columns, rows })
    }

    /// Empty table with the given schema
    pub fn empty(columns: Vec<Column>) -> Result<Self> {
        Self::new(columns, Vec::new())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Declared type of a named column
    pub fn column_type(&self, name: &str) -> Result<ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.ctype)
            .ok_or_else(|| TapError::UnknownColumn(name.to_string()))
    }

    fn column_index(&self, column: &ColumnRef) -> Result<usize> {
        match column {
            ColumnRef::Name(name) => self
                .columns
                .iter()
                .position(|c| &c.name == name)
                .ok_or_else(|| TapError::UnknownColumn(name.clone())),
            ColumnRef::Index(index) => {
                if *index < self.columns.len() {
                    Ok(*index)
                } else {
                    Err(TapError::IndexOutOfRange(format!(
                        "column index {} out of range for {} columns",
                        index,
                        self.columns.len()
                    )))
                }
            }
        }
    }

    /// Cell access by row index and column name or position
    pub fn get(&self, row: usize, column: impl Into<ColumnRef>) -> Result<&Value> {
        let col = self.column_index(&column.into())?;
        let row_values = self.rows.get(row).ok_or_else(|| {
            TapError::IndexOutOfRange(format!(
                "row index {} out of range for {} rows",
                row,
                self.rows.len()
            ))
        })?;
        Ok(&row_values[col])
    }

    /// Vertical concatenation: requires an identical (name, type) column
    /// sequence. Self's rows precede other's rows.
    pub fn concat(&self, other: &ResultTable) -> Result<ResultTable> {
        if self.columns.len() != other.columns.len() {
            return Err(TapError::SchemaMismatch(format!(
                "column count differs: {} vs {}",
                self.columns.len(),
                other.columns.len()
            )));
        }
        for (a, b) in self.columns.iter().zip(other.columns.iter()) {
            if a.name != b.name || a.ctype != b.ctype {
                return Err(TapError::SchemaMismatch(format!(
                    "column '{}' ({}) does not match column '{}' ({})",
                    a.name, a.ctype, b.name, b.ctype
                )));
            }
        }
        let mut rows = self.rows.clone();
        rows.extend(other.rows.iter().cloned());
        Ok(ResultTable {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Copy of rows `[start, end)` with the same schema. Value semantics:
    /// the slice shares no state with the original.
    pub fn slice(&self, start: usize, end: usize) -> Result<ResultTable> {
        if start > end || end > self.rows.len() {
            return Err(TapError::IndexOutOfRange(format!(
                "slice [{}, {}) out of range for {} rows",
                start,
                end,
                self.rows.len()
            )));
        }
        Ok(ResultTable {
            columns: self.columns.clone(),
            rows: self.rows[start..end].to_vec(),
        })
    }

    /// Parse a CSV payload, inferring each column's type from its cells.
    ///
    /// Inference is per column over the non-empty cells: all integers ->
    /// Int, otherwise all booleans -> Bool, otherwise all numeric -> Float,
    /// otherwise String. Empty cells parse as Null.
    pub fn from_csv(data: &[u8]) -> Result<Self> {
        let (headers, records) = read_csv_records(data)?;
        let columns = infer_schema(&headers, &records);
        typed_rows(columns, &records)
    }

    /// Parse a CSV payload against a declared schema.
    ///
    /// The header row must match the declared column names exactly, and
    /// every cell must parse as its column's declared type; any mismatch is
    /// a `ParseError` carrying the offending line.
    pub fn from_csv_with_schema(data: &[u8], columns: Vec<Column>) -> Result<Self> {
        let (headers, records) = read_csv_records(data)?;
        if headers.len() != columns.len() {
            return Err(TapError::Parse {
                line: 1,
                detail: format!(
                    "header has {} columns, schema declares {}",
                    headers.len(),
                    columns.len()
                ),
            });
        }
        for (header, col) in headers.iter().zip(columns.iter()) {
            if header != &col.name {
                return Err(TapError::Parse {
                    line: 1,
                    detail: format!(
                        "header column '{}' does not match declared column '{}'",
                        header, col.name
                    ),
                });
            }
        }
        typed_rows(columns, &records)
    }

    /// Serialize to the CSV wire format: header row then data rows, Null as
    /// an empty cell.
    ///
    /// CSV cannot distinguish an empty string from a missing value: both
    /// serialize as an empty cell, and empty cells read back as `Null`.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(self.columns.iter().map(|c| c.name.as_str()))
            .map_err(|e| TapError::Other(format!("CSV serialization failed: {}", e)))?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|v| v.to_string()))
                .map_err(|e| TapError::Other(format!("CSV serialization failed: {}", e)))?;
        }
        writer
            .into_inner()
            .map_err(|e| TapError::Other(format!("CSV serialization failed: {}", e)))
    }
}

/// Read header and data records, tracking the source line of each record
fn read_csv_records(data: &[u8]) -> Result<(Vec<String>, Vec<(u64, Vec<String>)>)> {
    if data.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(TapError::Parse {
            line: 1,
            detail: "empty response body".to_string(),
        });
    }

    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(data);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| csv_parse_error(&e))?
        .iter()
        .map(|s| s.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| csv_parse_error(&e))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.len() != headers.len() {
            return Err(TapError::Parse {
                line,
                detail: format!(
                    "row has {} fields, header has {}",
                    record.len(),
                    headers.len()
                ),
            });
        }
        let cells: Vec<String> = record.iter().map(|s| s.to_string()).collect();
        records.push((line, cells));
    }

    Ok((headers, records))
}

fn csv_parse_error(err: &csv::Error) -> TapError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    TapError::Parse {
        line,
        detail: err.to_string(),
    }
}

/// Infer a column type for each header from the non-empty cells below it
fn infer_schema(headers: &[String], records: &[(u64, Vec<String>)]) -> Vec<Column> {
    headers
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut seen = false;
            let mut all_int = true;
            let mut all_float = true;
            let mut all_bool = true;
            for (_, cells) in records {
                let cell = cells[i].trim();
                if cell.is_empty() {
                    continue;
                }
                seen = true;
                all_int &= cell.parse::<i64>().is_ok();
                all_float &= cell.parse::<f64>().is_ok();
                all_bool &= is_bool_text(cell);
            }
            let ctype = if !seen {
                ColumnType::String
            } else if all_int {
                ColumnType::Int
            } else if all_bool {
                ColumnType::Bool
            } else if all_float {
                ColumnType::Float
            } else {
                ColumnType::String
            };
            Column::new(name.clone(), ctype)
        })
        .collect()
}

/// Convert string records to typed rows, validating against the schema
fn typed_rows(columns: Vec<Column>, records: &[(u64, Vec<String>)]) -> Result<ResultTable> {
    let mut rows = Vec::with_capacity(records.len());
    for (line, cells) in records {
        let mut row = Vec::with_capacity(columns.len());
        for (cell, col) in cells.iter().zip(columns.iter()) {
            row.push(parse_cell(cell, col, *line)?);
        }
        rows.push(row);
    }
    ResultTable::new(columns, rows)
}

fn parse_cell(cell: &str, column: &Column, line: u64) -> Result<Value> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(Value::Null);
    }
    let mismatch = || TapError::Parse {
        line,
        detail: format!(
            "column '{}': cannot parse '{}' as {}",
            column.name, cell, column.ctype
        ),
    };
    match column.ctype {
        ColumnType::String => Ok(Value::Str(cell.to_string())),
        ColumnType::Int => cell.parse::<i64>().map(Value::Int).map_err(|_| mismatch()),
        ColumnType::Float => cell
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| mismatch()),
        ColumnType::Bool => {
            if cell.eq_ignore_ascii_case("true") {
                Ok(Value::Bool(true))
            } else if cell.eq_ignore_ascii_case("false") {
                Ok(Value::Bool(false))
            } else {
                Err(mismatch())
            }
        }
    }
}

fn is_bool_text(cell: &str) -> bool {
    cell.eq_ignore_ascii_case("true") || cell.eq_ignore_ascii_case("false")
}
