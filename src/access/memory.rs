//! In-memory partitioned tables.
//!
//! `MemoryFrameSource` plays the storage layer's role for the diagnostic
//! binary and the tests: each partition is produced as one or more frames,
//! and row ids are cumulative across partitions.

use crate::access::frame::{ColumnBuffer, DataFrame, FrameSource, RowId};
use crate::access::value::StorageType;
use anyhow::{bail, Result};
use std::ops::Range;
use std::sync::Arc;

/// Owned column storage
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedColumn {
    Boolean(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl OwnedColumn {
    pub fn storage_type(&self) -> StorageType {
        self.slice(0..0).storage_type()
    }

    pub fn len(&self) -> usize {
        match self {
            OwnedColumn::Boolean(v) => v.len(),
            OwnedColumn::Int8(v) => v.len(),
            OwnedColumn::Int16(v) => v.len(),
            OwnedColumn::Int32(v) => v.len(),
            OwnedColumn::Int64(v) => v.len(),
            OwnedColumn::Float32(v) => v.len(),
            OwnedColumn::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow a row range of the column
    pub fn slice(&self, range: Range<usize>) -> ColumnBuffer<'_> {
        match self {
            OwnedColumn::Boolean(v) => ColumnBuffer::Boolean(&v[range]),
            OwnedColumn::Int8(v) => ColumnBuffer::Int8(&v[range]),
            OwnedColumn::Int16(v) => ColumnBuffer::Int16(&v[range]),
            OwnedColumn::Int32(v) => ColumnBuffer::Int32(&v[range]),
            OwnedColumn::Int64(v) => ColumnBuffer::Int64(&v[range]),
            OwnedColumn::Float32(v) => ColumnBuffer::Float32(&v[range]),
            OwnedColumn::Float64(v) => ColumnBuffer::Float64(&v[range]),
        }
    }

    pub fn as_buffer(&self) -> ColumnBuffer<'_> {
        self.slice(0..self.len())
    }
}

/// One partition: columns of equal length
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    columns: Vec<OwnedColumn>,
    row_count: usize,
}

impl Partition {
    pub fn new(columns: Vec<OwnedColumn>) -> Result<Self> {
        let row_count = columns.first().map(OwnedColumn::len).unwrap_or(0);
        if let Some((index, column)) = columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.len() != row_count)
        {
            bail!(
                "column {} has {} rows, expected {}",
                index,
                column.len(),
                row_count
            );
        }
        Ok(Self { columns, row_count })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn columns(&self) -> &[OwnedColumn] {
        &self.columns
    }
}

/// Frame source over in-memory partitions
#[derive(Debug, Clone)]
pub struct MemoryFrameSource {
    partitions: Arc<Vec<Partition>>,
    max_frame_rows: Option<usize>,
    partition_index: usize,
    offset: usize,
    row_base: RowId,
    initialized: bool,
}

impl MemoryFrameSource {
    pub fn new(partitions: Vec<Partition>) -> Self {
        Self::from_shared(Arc::new(partitions))
    }

    /// Create a source over partitions shared with other sources
    pub fn from_shared(partitions: Arc<Vec<Partition>>) -> Self {
        Self {
            partitions,
            max_frame_rows: None,
            partition_index: 0,
            offset: 0,
            row_base: 0,
            initialized: false,
        }
    }

    /// Split partitions into frames of at most `rows` rows
    pub fn with_max_frame_rows(mut self, rows: usize) -> Self {
        self.max_frame_rows = if rows == 0 { None } else { Some(rows) };
        self
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Total number of rows over all partitions
    pub fn row_count(&self) -> usize {
        self.partitions.iter().map(Partition::row_count).sum()
    }

    fn rewind(&mut self) {
        self.partition_index = 0;
        self.offset = 0;
        self.row_base = 0;
    }
}

impl FrameSource for MemoryFrameSource {
    fn init(&mut self) -> Result<()> {
        self.rewind();
        self.initialized = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<DataFrame<'_>>> {
        if !self.initialized {
            bail!("Frame source not initialized. Call init() first.");
        }

        // Skip exhausted and empty partitions
        while let Some(partition) = self.partitions.get(self.partition_index) {
            if self.offset < partition.row_count() {
                break;
            }
            self.partition_index += 1;
            self.offset = 0;
        }
        let index = self.partition_index;
        let Some(remaining) = self
            .partitions
            .get(index)
            .map(|p| p.row_count() - self.offset)
        else {
            return Ok(None);
        };

        let rows = self.max_frame_rows.map_or(remaining, |m| m.min(remaining));
        let start = self.offset;
        let row_base = self.row_base;
        self.offset += rows;
        self.row_base += rows as RowId;

        let partition = &self.partitions[index];
        let columns = partition
            .columns()
            .iter()
            .map(|c| c.slice(start..start + rows))
            .collect();
        Ok(Some(DataFrame::new(row_base, rows, columns)))
    }

    fn to_top(&mut self) -> Result<()> {
        self.rewind();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::Datum;

    fn partition(values: Vec<i32>) -> Partition {
        Partition::new(vec![OwnedColumn::Int32(values)]).unwrap()
    }

    #[test]
    fn test_partition_rejects_ragged_columns() {
        let result = Partition::new(vec![
            OwnedColumn::Int32(vec![1, 2]),
            OwnedColumn::Int64(vec![1]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_frames_have_cumulative_row_ids() -> Result<()> {
        let mut source = MemoryFrameSource::new(vec![
            partition(vec![1, 2, 3]),
            partition(vec![]),
            partition(vec![4, 5]),
        ]);
        source.init()?;

        let mut bases = Vec::new();
        while let Some(frame) = source.next_frame()? {
            bases.push((frame.row_base, frame.row_count));
        }
        assert_eq!(bases, vec![(0, 3), (3, 2)]);
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn test_max_frame_rows_and_rewind() -> Result<()> {
        let mut source =
            MemoryFrameSource::new(vec![partition((0..5).collect())]).with_max_frame_rows(2);
        source.init()?;

        let mut first = Vec::new();
        while let Some(frame) = source.next_frame()? {
            first.push((frame.row_base, frame.row_count, frame.columns[0].datum(0)));
        }
        assert_eq!(
            first,
            vec![
                (0, 2, Some(Datum::Int32(0))),
                (2, 2, Some(Datum::Int32(2))),
                (4, 1, Some(Datum::Int32(4))),
            ]
        );

        source.to_top()?;
        let frame = source.next_frame()?.unwrap();
        assert_eq!(frame.row_base, 0);
        Ok(())
    }

    #[test]
    fn test_next_frame_requires_init() {
        let mut source = MemoryFrameSource::new(vec![partition(vec![1])]);
        assert!(source.next_frame().is_err());
    }
}
