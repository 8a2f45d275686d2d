// Driver abstraction shared by every backing store.
//
// Drivers turn their native rows into `ColumnValue`s, choosing the variant from
// the column type descriptor the driver reports. Rendering to text happens in
// one place so every dialect produces the same string encoding.
use crate::api::middleware::AppError;
use crate::services::dialect::Dialect;
use chrono::{DateTime, FixedOffset};

/// Column name plus the type name reported by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_name: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A homogeneous array column value
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

/// A single decoded cell
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bytes(Vec<u8>),
    Text(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Timestamp(DateTime<FixedOffset>),
    Array(ArrayValue),
    /// Value of a type this crate cannot render; holds the driver type name
    Unsupported(String),
}

impl ColumnValue {
    /// Render the value as text; `None` for unsupported types
    pub fn render(&self) -> Option<String> {
        let text = match self {
            ColumnValue::Null => "null".to_string(),
            ColumnValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            ColumnValue::Text(text) => text.clone(),
            ColumnValue::Bool(b) => b.to_string(),
            ColumnValue::Int(i) => i.to_string(),
            ColumnValue::UInt(u) => u.to_string(),
            ColumnValue::Float(f) => format!("{:.6}", f),
            ColumnValue::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f %:z").to_string(),
            ColumnValue::Array(array) => {
                let items: Vec<String> = match array {
                    ArrayValue::Int(values) => values.iter().map(|v| v.to_string()).collect(),
                    ArrayValue::Float(values) => values.iter().map(|v| format!("{:.6}", v)).collect(),
                    ArrayValue::Text(values) => values.clone(),
                };
                format!("[{}]", items.join(","))
            }
            ColumnValue::Unsupported(_) => return None,
        };
        Some(text)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ColumnValue::Text(_) | ColumnValue::Bytes(_))
    }
}

/// Decoder used by `BufferedCursor` to turn a native row into cells
pub type RowDecoder<R> = fn(&[ColumnDescriptor], R) -> Result<Vec<ColumnValue>, AppError>;

/// Forward-only cursor over a statement result.
///
/// Dropping the cursor releases everything it holds, so callers only need to
/// keep it scoped to release it on every exit path.
pub trait RowCursor: Send {
    fn columns(&self) -> &[ColumnDescriptor];

    /// Decode the next row, `Ok(None)` once exhausted
    fn next_row(&mut self) -> Result<Option<Vec<ColumnValue>>, AppError>;
}

pub type BoxedCursor = Box<dyn RowCursor>;

/// Cursor over rows the driver already buffered, decoded lazily row by row
pub struct BufferedCursor<R> {
    columns: Vec<ColumnDescriptor>,
    rows: std::vec::IntoIter<R>,
    decode: RowDecoder<R>,
}

impl<R: Send + 'static> BufferedCursor<R> {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<R>, decode: RowDecoder<R>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
            decode,
        }
    }

    pub fn boxed(columns: Vec<ColumnDescriptor>, rows: Vec<R>, decode: RowDecoder<R>) -> BoxedCursor {
        Box::new(Self::new(columns, rows, decode))
    }
}

impl<R: Send> RowCursor for BufferedCursor<R> {
    fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<ColumnValue>>, AppError> {
        match self.rows.next() {
            Some(row) => (self.decode)(&self.columns, row).map(Some),
            None => Ok(None),
        }
    }
}

/// Cursor with no columns, returned for statements that produce no result set
pub fn empty_cursor() -> BoxedCursor {
    BufferedCursor::<Vec<ColumnValue>>::boxed(Vec::new(), Vec::new(), |_, row| Ok(row))
}

/// A live, dialect-tagged connection to one database of a store
#[async_trait::async_trait]
pub trait SqlConnection: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run a statement through the row path.
    ///
    /// Returns `Ok(None)` when the driver produced no cursor for this statement
    /// shape; callers then fall back to `execute`.
    async fn fetch(&self, sql: &str) -> Result<Option<BoxedCursor>, AppError>;

    /// Generic statement execution; always yields a cursor, possibly empty
    async fn execute(&self, sql: &str) -> Result<BoxedCursor, AppError>;

    /// Test connectivity
    async fn ping(&self) -> Result<(), AppError>;

    /// Release the underlying driver resources
    async fn close(&self);
}
