use crate::access::{DataFrame, RowId, StorageType};
use crate::jit::codegen::CodegenMode;
use crate::jit::{JitError, JitResult};
use cranelift_jit::JITModule;
use std::fmt;

/// Native signature of a compiled filter
pub(crate) type FilterFn =
    unsafe extern "C" fn(cols: *const *const u8, row_count: i64, out: *mut i64, row_base: i64) -> i64;

/// A filter compiled to native code.
///
/// Owns the executable memory of its routine, released exactly once when the
/// value is dropped. Share it through `Arc` to keep the code alive across
/// cursors and caches.
pub struct CompiledFilter {
    module: Option<JITModule>,
    function: FilterFn,
    mode: CodegenMode,
    lanes: usize,
    layout: Vec<(usize, StorageType)>,
    column_count: usize,
}

// SAFETY: the generated code only reads the column memory and writes the
// output buffer handed to each call; the module is never mutated after
// finalization.
unsafe impl Send for CompiledFilter {}
unsafe impl Sync for CompiledFilter {}

impl CompiledFilter {
    pub(crate) fn new(
        module: JITModule,
        function: FilterFn,
        mode: CodegenMode,
        lanes: usize,
        layout: Vec<(usize, StorageType)>,
        column_count: usize,
    ) -> Self {
        Self {
            module: Some(module),
            function,
            mode,
            lanes,
            layout,
            column_count,
        }
    }

    pub fn mode(&self) -> CodegenMode {
        self.mode
    }

    /// Rows evaluated per SIMD iteration
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Run the routine over `frame`, appending the absolute ids of matching
    /// rows to `out` in ascending order. Returns the number appended.
    pub fn execute(&self, frame: &DataFrame<'_>, out: &mut Vec<RowId>) -> JitResult<usize> {
        // The routine trusts every pointer it gets
        frame.validate_layout(&self.layout)?;
        let rows = frame.row_count;
        if rows == 0 {
            return Ok(0);
        }

        let width = self
            .layout
            .last()
            .map(|(index, _)| index + 1)
            .unwrap_or(0)
            .max(self.column_count);
        let mut pointers = vec![std::ptr::null::<u8>(); width];
        for &(index, _) in &self.layout {
            pointers[index] = frame.columns[index].as_ptr();
        }

        let start = out.len();
        out.try_reserve(rows)
            .map_err(|e| JitError::Allocation(format!("output for {rows} rows: {e}")))?;
        out.resize(start + rows, 0);

        // SAFETY: every referenced column was checked to hold `rows` cells of
        // the expected storage, and `out[start..]` has room for `rows` ids,
        // the most the routine ever writes.
        let matched = unsafe {
            (self.function)(
                pointers.as_ptr(),
                rows as i64,
                out[start..].as_mut_ptr(),
                frame.row_base,
            )
        };

        let matched = usize::try_from(matched).unwrap_or(0).min(rows);
        out.truncate(start + matched);
        Ok(matched)
    }
}

impl Drop for CompiledFilter {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: `function` points into this module and dies with `self`;
            // no call can be running since we hold the only reference.
            unsafe { module.free_memory() };
        }
    }
}

impl fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("mode", &self.mode)
            .field("lanes", &self.lanes)
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{ColumnBuffer, ColumnMeta, DataType, FrameError, Value};
    use crate::expression::{resolve_filter, select_rows, Expression};
    use crate::jit::codegen::compile_filter;
    use crate::jit::features::{jit_supported, simd_supported};

    fn compile(expr: &Expression, metadata: &[ColumnMeta], mode: CodegenMode) -> anyhow::Result<Option<CompiledFilter>> {
        if !jit_supported() || (mode == CodegenMode::Vectorized && !simd_supported()) {
            return Ok(None);
        }
        let filter = resolve_filter(expr, metadata)?;
        Ok(Some(compile_filter(&filter, mode)?))
    }

    #[test]
    fn test_execute_appends_absolute_ids() -> anyhow::Result<()> {
        let metadata = vec![ColumnMeta::new("x", DataType::Int64)];
        let expr = Expression::gt(Expression::column(0), Expression::literal(Value::Int64(2)));
        let Some(compiled) = compile(&expr, &metadata, CodegenMode::Vectorized)? else {
            return Ok(());
        };
        assert_eq!(compiled.lanes(), 2);

        let values = [1i64, 5, 2, 9, 3];
        let frame = DataFrame::new(1000, values.len(), vec![ColumnBuffer::Int64(&values)]);
        let mut out = vec![-7];
        assert_eq!(compiled.execute(&frame, &mut out)?, 3);
        assert_eq!(out, vec![-7, 1001, 1003, 1004]);
        Ok(())
    }

    #[test]
    fn test_execute_rejects_mismatched_frame() -> anyhow::Result<()> {
        let metadata = vec![ColumnMeta::new("x", DataType::Int32)];
        let expr = Expression::is_null(Expression::column(0));
        let Some(compiled) = compile(&expr, &metadata, CodegenMode::ScalarOnly)? else {
            return Ok(());
        };

        let longs = [1i64, 2];
        let frame = DataFrame::new(0, 2, vec![ColumnBuffer::Int64(&longs)]);
        let mut out = Vec::new();
        let err = compiled.execute(&frame, &mut out).unwrap_err();
        assert!(matches!(
            err,
            JitError::Frame(FrameError::StorageMismatch { index: 0, .. })
        ));

        let ints = [1i32, i32::MIN];
        let frame = DataFrame::new(0, 3, vec![ColumnBuffer::Int32(&ints)]);
        let err = compiled.execute(&frame, &mut out).unwrap_err();
        assert!(matches!(err, JitError::Frame(FrameError::LengthMismatch { .. })));
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_frame() -> anyhow::Result<()> {
        let metadata = vec![ColumnMeta::new("x", DataType::Int16)];
        let expr = Expression::is_not_null(Expression::column(0));
        let Some(compiled) = compile(&expr, &metadata, CodegenMode::Vectorized)? else {
            return Ok(());
        };
        let empty: [i16; 0] = [];
        let frame = DataFrame::new(50, 0, vec![ColumnBuffer::Int16(&empty)]);
        let mut out = Vec::new();
        assert_eq!(compiled.execute(&frame, &mut out)?, 0);
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn test_float_and_boolean_columns() -> anyhow::Result<()> {
        let metadata = vec![
            ColumnMeta::new("f", DataType::Float32),
            ColumnMeta::new("d", DataType::Float64),
            ColumnMeta::new("flag", DataType::Boolean),
        ];
        let f: Vec<f32> = (0..23).map(|i| if i % 7 == 0 { f32::NAN } else { i as f32 / 3.0 }).collect();
        let d: Vec<f64> = (0..23).map(|i| if i % 5 == 0 { f64::NAN } else { 7.0 - i as f64 / 2.0 }).collect();
        let flag: Vec<bool> = (0..23).map(|i| i % 3 != 0).collect();
        let frame = DataFrame::new(
            0,
            23,
            vec![
                ColumnBuffer::Float32(&f),
                ColumnBuffer::Float64(&d),
                ColumnBuffer::Boolean(&flag),
            ],
        );
        let exprs = [
            Expression::lt(Expression::column(0), Expression::column(1)),
            Expression::eq(Expression::column(0), Expression::column(1)),
            Expression::and(
                Expression::column(2),
                Expression::ge(
                    Expression::mul_expr(Expression::column(0), Expression::column(0)),
                    Expression::literal(Value::Float64(4.0)),
                ),
            ),
            Expression::or(
                Expression::not_expr(Expression::column(2)),
                Expression::is_null(Expression::column(1)),
            ),
            Expression::ne(
                Expression::div_expr(Expression::column(0), Expression::literal(Value::Float32(3.0))),
                Expression::neg(Expression::column(0)),
            ),
        ];
        for expr in &exprs {
            let filter = resolve_filter(expr, &metadata)?;
            let mut expected = Vec::new();
            select_rows(&filter, &frame, &mut expected)?;
            for mode in [CodegenMode::Vectorized, CodegenMode::ScalarOnly] {
                let Some(compiled) = compile(expr, &metadata, mode)? else {
                    continue;
                };
                let mut actual = Vec::new();
                compiled.execute(&frame, &mut actual)?;
                assert_eq!(actual, expected, "{expr} {mode:?}");
            }
        }
        Ok(())
    }
}
