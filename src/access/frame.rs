//! Data frames: borrowed per-partition column memory.

use crate::access::symbol::SymbolTable;
use crate::access::value::{DataType, Datum, StorageType};
use anyhow::Result;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// Absolute row identifier
pub type RowId = i64;

/// Column metadata supplied by the storage layer alongside the filter tree
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: DataType,
    /// Whether the column may hold its kind's null representation
    pub nullable: bool,
    /// Dictionary for symbol columns
    pub symbols: Option<Arc<dyn SymbolTable>>,
}

impl ColumnMeta {
    /// Create column metadata. Every kind except boolean is nullable by default.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: data_type != DataType::Boolean,
            symbols: None,
        }
    }

    /// Mark the column as never holding nulls
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_symbols(mut self, symbols: Arc<dyn SymbolTable>) -> Self {
        self.symbols = Some(symbols);
        self
    }
}

/// Read-only view over one column of a frame
#[derive(Debug, Clone, Copy)]
pub enum ColumnBuffer<'a> {
    Boolean(&'a [bool]),
    Int8(&'a [i8]),
    Int16(&'a [i16]),
    Int32(&'a [i32]),
    Int64(&'a [i64]),
    Float32(&'a [f32]),
    Float64(&'a [f64]),
}

impl<'a> ColumnBuffer<'a> {
    pub fn storage_type(&self) -> StorageType {
        match self {
            ColumnBuffer::Boolean(_) => StorageType::Boolean,
            ColumnBuffer::Int8(_) => StorageType::Int8,
            ColumnBuffer::Int16(_) => StorageType::Int16,
            ColumnBuffer::Int32(_) => StorageType::Int32,
            ColumnBuffer::Int64(_) => StorageType::Int64,
            ColumnBuffer::Float32(_) => StorageType::Float32,
            ColumnBuffer::Float64(_) => StorageType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnBuffer::Boolean(v) => v.len(),
            ColumnBuffer::Int8(v) => v.len(),
            ColumnBuffer::Int16(v) => v.len(),
            ColumnBuffer::Int32(v) => v.len(),
            ColumnBuffer::Int64(v) => v.len(),
            ColumnBuffer::Float32(v) => v.len(),
            ColumnBuffer::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Base address of the column memory
    pub fn as_ptr(&self) -> *const u8 {
        match self {
            ColumnBuffer::Boolean(v) => v.as_ptr() as *const u8,
            ColumnBuffer::Int8(v) => v.as_ptr() as *const u8,
            ColumnBuffer::Int16(v) => v.as_ptr() as *const u8,
            ColumnBuffer::Int32(v) => v.as_ptr() as *const u8,
            ColumnBuffer::Int64(v) => v.as_ptr() as *const u8,
            ColumnBuffer::Float32(v) => v.as_ptr() as *const u8,
            ColumnBuffer::Float64(v) => v.as_ptr() as *const u8,
        }
    }

    pub fn slice(&self, range: Range<usize>) -> ColumnBuffer<'a> {
        match self {
            ColumnBuffer::Boolean(v) => ColumnBuffer::Boolean(v.get(range).unwrap_or(&[])),
            ColumnBuffer::Int8(v) => ColumnBuffer::Int8(v.get(range).unwrap_or(&[])),
            ColumnBuffer::Int16(v) => ColumnBuffer::Int16(v.get(range).unwrap_or(&[])),
            ColumnBuffer::Int32(v) => ColumnBuffer::Int32(v.get(range).unwrap_or(&[])),
            ColumnBuffer::Int64(v) => ColumnBuffer::Int64(v.get(range).unwrap_or(&[])),
            ColumnBuffer::Float32(v) => ColumnBuffer::Float32(v.get(range).unwrap_or(&[])),
            ColumnBuffer::Float64(v) => ColumnBuffer::Float64(v.get(range).unwrap_or(&[])),
        }
    }

    /// Read one cell
    pub fn datum(&self, row: usize) -> Option<Datum> {
        match self {
            ColumnBuffer::Boolean(v) => v.get(row).map(|x| Datum::Boolean(*x)),
            ColumnBuffer::Int8(v) => v.get(row).map(|x| Datum::Int8(*x)),
            ColumnBuffer::Int16(v) => v.get(row).map(|x| Datum::Int16(*x)),
            ColumnBuffer::Int32(v) => v.get(row).map(|x| Datum::Int32(*x)),
            ColumnBuffer::Int64(v) => v.get(row).map(|x| Datum::Int64(*x)),
            ColumnBuffer::Float32(v) => v.get(row).map(|x| Datum::Float32(*x)),
            ColumnBuffer::Float64(v) => v.get(row).map(|x| Datum::Float64(*x)),
        }
    }
}

/// Contract violations between a frame and the column metadata a filter was built for
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has {available} columns, filter references column {index}")]
    MissingColumn { index: usize, available: usize },

    #[error("column {index} is stored as {actual:?}, expected {expected:?}")]
    StorageMismatch {
        index: usize,
        expected: StorageType,
        actual: StorageType,
    },

    #[error("column {index} holds {actual} values, frame row count is {expected}")]
    LengthMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Contiguous per-partition column memory plus the absolute id of its first row
#[derive(Debug, Clone)]
pub struct DataFrame<'a> {
    pub row_base: RowId,
    pub row_count: usize,
    pub columns: Vec<ColumnBuffer<'a>>,
}

impl<'a> DataFrame<'a> {
    pub fn new(row_base: RowId, row_count: usize, columns: Vec<ColumnBuffer<'a>>) -> Self {
        Self {
            row_base,
            row_count,
            columns,
        }
    }

    pub fn column(&self, index: usize) -> Option<&ColumnBuffer<'a>> {
        self.columns.get(index)
    }

    /// Rows `range` of this frame as a frame of its own; row ids stay absolute.
    /// Columns not covering the range come back empty.
    pub fn slice(&self, range: Range<usize>) -> DataFrame<'a> {
        let columns = self
            .columns
            .iter()
            .map(|c| c.slice(range.clone()))
            .collect();
        DataFrame {
            row_base: self.row_base + range.start as RowId,
            row_count: range.len(),
            columns,
        }
    }

    /// Check that every referenced column exists, is stored as its metadata says
    /// and holds exactly `row_count` values.
    pub fn validate(
        &self,
        metadata: &[ColumnMeta],
        referenced: &[usize],
    ) -> std::result::Result<(), FrameError> {
        for &index in referenced {
            let expected = metadata.get(index).and_then(|m| m.data_type.storage());
            self.check_column(index, expected)?;
        }
        Ok(())
    }

    /// Same checks against an explicit storage layout
    pub fn validate_layout(
        &self,
        layout: &[(usize, StorageType)],
    ) -> std::result::Result<(), FrameError> {
        for &(index, storage) in layout {
            self.check_column(index, Some(storage))?;
        }
        Ok(())
    }

    fn check_column(
        &self,
        index: usize,
        expected: Option<StorageType>,
    ) -> std::result::Result<(), FrameError> {
        let column = self.columns.get(index).ok_or(FrameError::MissingColumn {
            index,
            available: self.columns.len(),
        })?;
        if let Some(expected) = expected {
            if column.storage_type() != expected {
                return Err(FrameError::StorageMismatch {
                    index,
                    expected,
                    actual: column.storage_type(),
                });
            }
        }
        if column.len() != self.row_count {
            return Err(FrameError::LengthMismatch {
                index,
                expected: self.row_count,
                actual: column.len(),
            });
        }
        Ok(())
    }
}

/// Re-startable producer of successive frames
pub trait FrameSource: Send {
    /// Prepare the source. Must be called before `next_frame()`.
    fn init(&mut self) -> Result<()>;

    /// Get the next frame, or `None` once every partition has been produced
    fn next_frame(&mut self) -> Result<Option<DataFrame<'_>>>;

    /// Rewind to the first frame
    fn to_top(&mut self) -> Result<()>;
}
