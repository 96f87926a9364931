//! Access layer for frame-oriented column reads.
//!
//! This module provides the contract between the filter engine and the
//! storage layer:
//!
//! - **DataType**: Physical column kinds, their null sentinels and promotion ladder
//! - **Value**: Typed literal values produced by the planner
//! - **Datum**: A single decoded cell, with nulls kept in-band as sentinels
//! - **DataFrame**: Borrowed, contiguous per-partition column memory
//! - **FrameSource**: A re-startable producer of successive frames
//!
//! Frames are owned by the storage layer and only ever borrowed read-only here.

pub mod frame;
pub mod memory;
pub mod symbol;
pub mod value;

pub use frame::{ColumnBuffer, ColumnMeta, DataFrame, FrameError, FrameSource, RowId};
pub use memory::{MemoryFrameSource, OwnedColumn, Partition};
pub use symbol::{SymbolDictionary, SymbolTable, ABSENT_SYMBOL_KEY};
pub use value::{DataType, Datum, StorageType, Value};
