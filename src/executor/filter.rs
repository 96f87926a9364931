//! Filter cursor implementation.
//!
//! The cursor pulls frames from its source, selects the matching rows of a
//! whole frame at a time (through the compiled routine or the interpreter)
//! and then hands the buffered row ids out one by one. Row ids come out in
//! ascending order within a frame and in frame order across frames.

use crate::access::{ColumnMeta, DataFrame, FrameSource, RowId};
use crate::executor::{ExecutionPath, FilterError, RowCursor};
use crate::expression::{select_rows, ResolvedFilter};
use crate::jit::CompiledFilter;
use anyhow::Result;
use log::{debug, trace};
use std::sync::Arc;

/// Cursor over the ids of the rows matching one filter
pub struct FilterCursor {
    source: Box<dyn FrameSource>,
    filter: Arc<ResolvedFilter>,
    metadata: Arc<[ColumnMeta]>,
    compiled: Option<Arc<CompiledFilter>>,
    path: ExecutionPath,
    /// Upper bound on rows per routine call; larger frames are sliced
    max_frame_rows: usize,
    /// Matches of the current frame
    rows: Vec<RowId>,
    position: usize,
    exhausted: bool,
    initialized: bool,
    closed: bool,
}

impl FilterCursor {
    pub(crate) fn new(
        source: Box<dyn FrameSource>,
        filter: Arc<ResolvedFilter>,
        metadata: Arc<[ColumnMeta]>,
        compiled: Option<Arc<CompiledFilter>>,
        path: ExecutionPath,
        max_frame_rows: usize,
    ) -> Self {
        // A cursor without its routine can only interpret
        let path = if compiled.is_some() {
            path
        } else {
            ExecutionPath::Interpreter
        };
        Self {
            source,
            filter,
            metadata,
            compiled,
            path,
            max_frame_rows: max_frame_rows.max(1),
            rows: Vec::new(),
            position: 0,
            exhausted: false,
            initialized: false,
            closed: false,
        }
    }

    /// The path this cursor evaluates frames with
    pub fn path(&self) -> ExecutionPath {
        self.path
    }

    /// Evaluate the next frame and return all of its matches, possibly none.
    /// Returns `None` once the source is exhausted. Rows returned here are
    /// not produced again by `next()`.
    pub fn next_frame_rows(&mut self) -> Result<Option<&[RowId]>> {
        self.check_open()?;
        if !self.fetch_frame()? {
            return Ok(None);
        }
        self.position = self.rows.len();
        Ok(Some(&self.rows))
    }

    fn check_open(&self) -> std::result::Result<(), FilterError> {
        if self.closed {
            return Err(FilterError::Closed);
        }
        if !self.initialized {
            return Err(FilterError::NotInitialized);
        }
        Ok(())
    }

    /// Replace the buffered rows with the matches of the next frame.
    /// Returns false once the source has no more frames.
    fn fetch_frame(&mut self) -> Result<bool> {
        self.rows.clear();
        self.position = 0;
        if self.exhausted {
            return Ok(false);
        }
        let Some(frame) = self.source.next_frame()? else {
            self.exhausted = true;
            return Ok(false);
        };
        let matched = filter_frame(
            &frame,
            &self.filter,
            &self.metadata,
            self.compiled.as_deref(),
            self.max_frame_rows,
            &mut self.rows,
        )?;
        trace!(
            "frame at row {} with {} rows: {} matches ({})",
            frame.row_base,
            frame.row_count,
            matched,
            self.path
        );
        Ok(true)
    }
}

/// Append the matches of `frame` to `out`, slicing it into pieces of at most
/// `max_rows` rows.
fn filter_frame(
    frame: &DataFrame<'_>,
    filter: &ResolvedFilter,
    metadata: &[ColumnMeta],
    compiled: Option<&CompiledFilter>,
    max_rows: usize,
    out: &mut Vec<RowId>,
) -> std::result::Result<usize, FilterError> {
    frame.validate(metadata, &filter.columns)?;

    let mut matched = 0;
    let mut start = 0;
    while start < frame.row_count {
        let end = frame.row_count.min(start.saturating_add(max_rows));
        let piece;
        let part = if start == 0 && end == frame.row_count {
            frame
        } else {
            piece = frame.slice(start..end);
            &piece
        };
        matched += match compiled {
            Some(routine) => routine.execute(part, out)?,
            None => {
                out.try_reserve(part.row_count).map_err(|e| {
                    FilterError::ResourceExhausted(format!(
                        "row id buffer for {} rows: {}",
                        part.row_count, e
                    ))
                })?;
                select_rows(filter, part, out)?
            }
        };
        start = end;
    }
    Ok(matched)
}

impl RowCursor for FilterCursor {
    fn init(&mut self) -> Result<()> {
        if self.closed {
            return Err(FilterError::Closed.into());
        }
        self.source.init()?;
        self.rows.clear();
        self.position = 0;
        self.exhausted = false;
        self.initialized = true;
        debug!("filter cursor initialized on the {} path", self.path);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<RowId>> {
        self.check_open()?;
        loop {
            if let Some(&row) = self.rows.get(self.position) {
                self.position += 1;
                return Ok(Some(row));
            }
            if !self.fetch_frame()? {
                return Ok(None);
            }
        }
    }

    fn to_top(&mut self) -> Result<()> {
        self.check_open()?;
        self.source.to_top()?;
        self.rows.clear();
        self.position = 0;
        self.exhausted = false;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.compiled = None;
        self.rows = Vec::new();
        self.closed = true;
    }
}
