use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use vibejit::access::{
    ColumnMeta, DataFrame, DataType, FrameSource, MemoryFrameSource, OwnedColumn, Partition, RowId,
    SymbolDictionary, Value,
};
use vibejit::executor::{ExecutionContext, ExecutionPath, FilterCursorFactory, JitMode, RowCursor};
use vibejit::expression::{resolve_filter, select_rows, Expression, ResolvedFilter};
use vibejit::jit::{compile_filter, jit_supported, simd_supported, CodegenMode};
use vibejit::EngineConfig;

/// Columns: i8, i16, i32, i64, f32, f64 (all nullable), then a non-null i8,
/// a non-null i32 and a boolean
struct Table {
    rows: usize,
    columns: Vec<OwnedColumn>,
    metadata: Vec<ColumnMeta>,
}

impl Table {
    fn random(rows: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let pick = |specials: &[i64], lo: i64, hi: i64, rng: &mut StdRng| -> i64 {
            if rng.gen_ratio(1, 4) {
                specials[rng.gen_range(0..specials.len())]
            } else {
                rng.gen_range(lo..=hi)
            }
        };
        let i8s: Vec<i8> = (0..rows)
            .map(|_| pick(&[0, -1, 1, i8::MIN as i64, i8::MIN as i64 + 1, i8::MAX as i64], -12, 12, &mut rng) as i8)
            .collect();
        let i16s: Vec<i16> = (0..rows)
            .map(|_| pick(&[0, -1, 1, i16::MIN as i64, i16::MAX as i64], -300, 300, &mut rng) as i16)
            .collect();
        let i32s: Vec<i32> = (0..rows)
            .map(|_| pick(&[0, -1, 1, i32::MIN as i64, i32::MAX as i64], -1000, 1000, &mut rng) as i32)
            .collect();
        let i64s: Vec<i64> = (0..rows)
            .map(|_| pick(&[0, -1, 1, i64::MIN, i64::MAX, 1 << 40], -5000, 5000, &mut rng))
            .collect();
        let f32s: Vec<f32> = (0..rows)
            .map(|_| match rng.gen_range(0..8) {
                0 => f32::NAN,
                1 => 0.0,
                2 => -1.5,
                _ => rng.gen_range(-20.0f32..20.0),
            })
            .collect();
        let f64s: Vec<f64> = (0..rows)
            .map(|_| match rng.gen_range(0..8) {
                0 => f64::NAN,
                1 => -0.0,
                2 => 3.0,
                _ => rng.gen_range(-20.0f64..20.0),
            })
            .collect();
        let dense_i8: Vec<i8> = (0..rows).map(|_| rng.gen()).collect();
        let dense_i32: Vec<i32> = (0..rows).map(|_| rng.gen_range(-50..50)).collect();
        let flags: Vec<bool> = (0..rows).map(|_| rng.gen()).collect();

        Self {
            rows,
            columns: vec![
                OwnedColumn::Int8(i8s),
                OwnedColumn::Int16(i16s),
                OwnedColumn::Int32(i32s),
                OwnedColumn::Int64(i64s),
                OwnedColumn::Float32(f32s),
                OwnedColumn::Float64(f64s),
                OwnedColumn::Int8(dense_i8),
                OwnedColumn::Int32(dense_i32),
                OwnedColumn::Boolean(flags),
            ],
            metadata: vec![
                ColumnMeta::new("i8", DataType::Int8),
                ColumnMeta::new("i16", DataType::Int16),
                ColumnMeta::new("i32", DataType::Int32),
                ColumnMeta::new("i64", DataType::Int64),
                ColumnMeta::new("f32", DataType::Float32),
                ColumnMeta::new("f64", DataType::Float64),
                ColumnMeta::new("b", DataType::Int8).not_null(),
                ColumnMeta::new("k", DataType::Int32).not_null(),
                ColumnMeta::new("flag", DataType::Boolean),
            ],
        }
    }

    fn frame(&self, row_base: RowId) -> DataFrame<'_> {
        DataFrame::new(
            row_base,
            self.rows,
            self.columns.iter().map(OwnedColumn::as_buffer).collect(),
        )
    }
}

const NUMERIC: [usize; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

fn codegen_modes() -> Vec<CodegenMode> {
    let mut modes = Vec::new();
    if jit_supported() {
        modes.push(CodegenMode::ScalarOnly);
        if simd_supported() {
            modes.push(CodegenMode::Vectorized);
        }
    }
    modes
}

/// Resolve `expr`; `None` when the combination has no defined promotion
fn resolve(expr: &Expression, table: &Table) -> Result<Option<ResolvedFilter>> {
    match resolve_filter(expr, &table.metadata) {
        Ok(filter) => Ok(Some(filter)),
        Err(e) if e.is_unsupported() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Compare every available routine against the interpreter on `table`
fn check_equivalence(exprs: &[Expression], table: &Table) -> Result<usize> {
    let frame = table.frame(1000);
    let mut checked = 0;
    for expr in exprs {
        let Some(filter) = resolve(expr, table)? else {
            continue;
        };
        let mut expected = Vec::new();
        select_rows(&filter, &frame, &mut expected)?;
        for mode in codegen_modes() {
            let compiled = compile_filter(&filter, mode)?;
            let mut actual = Vec::new();
            compiled.execute(&frame, &mut actual)?;
            assert_eq!(
                actual, expected,
                "{expr} under {mode:?} with {} rows",
                table.rows
            );
        }
        checked += 1;
    }
    Ok(checked)
}

fn comparisons(left: Expression, right: Expression) -> Vec<Expression> {
    vec![
        Expression::eq(left.clone(), right.clone()),
        Expression::ne(left.clone(), right.clone()),
        Expression::lt(left.clone(), right.clone()),
        Expression::le(left.clone(), right.clone()),
        Expression::gt(left.clone(), right.clone()),
        Expression::ge(left, right),
    ]
}

fn arithmetic(left: Expression, right: Expression) -> Vec<Expression> {
    vec![
        Expression::add_expr(left.clone(), right.clone()),
        Expression::sub_expr(left.clone(), right.clone()),
        Expression::mul_expr(left.clone(), right.clone()),
        Expression::div_expr(left, right),
    ]
}

fn row_counts() -> Vec<usize> {
    vec![128, 129, 131, 135]
}

#[test]
fn test_comparison_grid() -> Result<()> {
    let mut exprs = Vec::new();
    for &a in &NUMERIC {
        for &b in &NUMERIC {
            exprs.extend(comparisons(Expression::column(a), Expression::column(b)));
        }
        exprs.extend(comparisons(
            Expression::column(a),
            Expression::literal(Value::Int32(9)),
        ));
        exprs.extend(comparisons(
            Expression::literal(Value::Float64(-0.5)),
            Expression::column(a),
        ));
    }
    for (i, rows) in row_counts().into_iter().enumerate() {
        let table = Table::random(rows, 11 + i as u64);
        assert!(check_equivalence(&exprs, &table)? > 0);
    }
    Ok(())
}

#[test]
fn test_arithmetic_grid() -> Result<()> {
    let mut exprs = Vec::new();
    for &a in &NUMERIC {
        for &b in &NUMERIC {
            for value in arithmetic(Expression::column(a), Expression::column(b)) {
                exprs.push(Expression::ge(value.clone(), Expression::column(a)));
                exprs.push(Expression::is_null(value.clone()));
                exprs.push(Expression::ne(value, Expression::literal(Value::Int32(0))));
            }
        }
    }
    for (i, rows) in row_counts().into_iter().enumerate() {
        let table = Table::random(rows, 23 + i as u64);
        assert!(check_equivalence(&exprs, &table)? > 0);
    }
    Ok(())
}

type Combine = fn(Expression, Expression) -> Expression;

/// Arithmetic operators, flagged when they bind tighter than `+` and `-`
fn operators() -> [(Combine, bool); 4] {
    [
        (Expression::add_expr, false),
        (Expression::sub_expr, false),
        (Expression::mul_expr, true),
        (Expression::div_expr, true),
    ]
}

fn maybe_negated(operand: Expression) -> [Expression; 2] {
    [operand.clone(), Expression::neg(operand)]
}

/// Fold `first op term op term ...` with the usual precedence: `*` and `/`
/// first, then `+` and `-` from left to right
fn infix(first: Expression, rest: Vec<((Combine, bool), Expression)>) -> Expression {
    let mut sums: Vec<(Option<Combine>, Expression)> = vec![(None, first)];
    for ((combine, tight), term) in rest {
        if tight {
            let (op, last) = sums.pop().expect("at least one term");
            sums.push((op, combine(last, term)));
        } else {
            sums.push((Some(combine), term));
        }
    }
    let mut terms = sums.into_iter();
    let (_, mut acc) = terms.next().expect("at least one term");
    for (op, term) in terms {
        acc = op.expect("additive operator")(acc, term);
    }
    acc
}

#[test]
fn test_negated_column_arithmetic_grid() -> Result<()> {
    let zero = || Expression::literal(Value::Int32(0));
    let mut exprs = Vec::new();
    for a in 0..6 {
        for left in maybe_negated(Expression::column(a)) {
            for (combine, _) in operators() {
                for b in 0..6 {
                    for right in maybe_negated(Expression::column(b)) {
                        exprs.push(Expression::eq(combine(left.clone(), right), zero()));
                    }
                }
            }
        }
    }
    for (i, rows) in [128, 131].into_iter().enumerate() {
        let table = Table::random(rows, 301 + i as u64);
        assert_eq!(check_equivalence(&exprs, &table)?, exprs.len());
    }
    Ok(())
}

#[test]
fn test_constant_column_arithmetic_grid() -> Result<()> {
    let int_constants = [Value::Int32(3), Value::Float64(-3.5)];
    let float_constants = [Value::Float64(42.5), Value::Int32(-42)];
    let add = (Expression::add_expr as Combine, false);

    let mut exprs = Vec::new();
    for first in &int_constants {
        for op1 in operators() {
            for a in 0..4 {
                for int_column in maybe_negated(Expression::column(a)) {
                    for second in &float_constants {
                        for op2 in operators() {
                            for f in [4, 5] {
                                for float_column in maybe_negated(Expression::column(f)) {
                                    let value = infix(
                                        Expression::literal(first.clone()),
                                        vec![
                                            (op1, int_column.clone()),
                                            (add, Expression::literal(second.clone())),
                                            (op2, float_column),
                                        ],
                                    );
                                    exprs.push(Expression::gt(
                                        value,
                                        Expression::literal(Value::Int32(0)),
                                    ));
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    for (i, rows) in [128, 131].into_iter().enumerate() {
        let table = Table::random(rows, 331 + i as u64);
        assert_eq!(check_equivalence(&exprs, &table)?, exprs.len());
    }
    Ok(())
}

#[test]
fn test_int_float_mixed() -> Result<()> {
    // -2 * f32 + 2.0 * i32 = 0 holds on every row when both hold the row number
    let expr = Expression::eq(
        Expression::add_expr(
            Expression::mul_expr(
                Expression::neg(Expression::literal(Value::Int32(2))),
                Expression::column(4),
            ),
            Expression::mul_expr(
                Expression::literal(Value::Float64(2.0)),
                Expression::column(2),
            ),
        ),
        Expression::literal(Value::Int32(0)),
    );
    for rows in [10usize, 128, 131] {
        let x = || 1..=rows as i64;
        let table = Table {
            rows,
            columns: vec![
                OwnedColumn::Int8(x().map(|v| v as i8).collect()),
                OwnedColumn::Int16(x().map(|v| v as i16).collect()),
                OwnedColumn::Int32(x().map(|v| v as i32).collect()),
                OwnedColumn::Int64(x().collect()),
                OwnedColumn::Float32(x().map(|v| v as f32).collect()),
                OwnedColumn::Float64(x().map(|v| v as f64).collect()),
            ],
            metadata: vec![
                ColumnMeta::new("i8", DataType::Int8),
                ColumnMeta::new("i16", DataType::Int16),
                ColumnMeta::new("i32", DataType::Int32),
                ColumnMeta::new("i64", DataType::Int64),
                ColumnMeta::new("f32", DataType::Float32),
                ColumnMeta::new("f64", DataType::Float64),
            ],
        };
        let filter = resolve_filter(&expr, &table.metadata)?;
        let mut interpreted = Vec::new();
        select_rows(&filter, &table.frame(1000), &mut interpreted)?;
        assert_eq!(interpreted, (1000..1000 + rows as RowId).collect::<Vec<_>>());
        assert_eq!(check_equivalence(&[expr.clone()], &table)?, 1);
    }
    Ok(())
}

const SYMBOLS: [&str; 4] = ["A", "B", "C", "D"];

/// Columns: a symbol (keys into `SYMBOLS`) and geohashes of 5, 10 and 40 bits,
/// all nullable
fn symbol_geohash_table(rows: usize, seed: u64) -> Table {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut value = |null: i64, lo: i64, hi: i64| -> i64 {
        if rng.gen_ratio(1, 8) {
            null
        } else {
            rng.gen_range(lo..hi)
        }
    };
    let symbols: Vec<i32> = (0..rows)
        .map(|_| value(i32::MIN as i64, 0, SYMBOLS.len() as i64) as i32)
        .collect();
    let g5: Vec<i8> = (0..rows).map(|_| value(-1, 0, 8) as i8).collect();
    let g10: Vec<i16> = (0..rows).map(|_| value(-1, 95, 105) as i16).collect();
    let g40: Vec<i64> = (0..rows).map(|_| value(-1, 0, 10)).collect();

    Table {
        rows,
        columns: vec![
            OwnedColumn::Int32(symbols),
            OwnedColumn::Int8(g5),
            OwnedColumn::Int16(g10),
            OwnedColumn::Int64(g40),
        ],
        metadata: vec![
            ColumnMeta::new("sym", DataType::Symbol)
                .with_symbols(Arc::new(SymbolDictionary::from_values(SYMBOLS))),
            ColumnMeta::new("g5", DataType::GeoHash { bits: 5 }),
            ColumnMeta::new("g10", DataType::GeoHash { bits: 10 }),
            ColumnMeta::new("g40", DataType::GeoHash { bits: 40 }),
        ],
    }
}

#[test]
fn test_symbol_and_geohash_equivalence() -> Result<()> {
    let sym = || Expression::column(0);
    let text = |s: &str| Expression::literal(Value::String(s.to_string()));
    let hash = |bits: u8, value: i64| Expression::literal(Value::GeoHash { bits, value });

    let sym_b = Expression::eq(sym(), text("B"));
    let g5_eq = Expression::eq(Expression::column(1), hash(5, 3));
    let g10_ne = Expression::ne(Expression::column(2), hash(10, 100));
    let g40_eq = Expression::eq(Expression::column(3), hash(40, 7));
    let g5_null = Expression::is_null(Expression::column(1));
    let absent = Expression::eq(sym(), text("absent"));

    let exprs = vec![
        sym_b.clone(),
        Expression::ne(sym(), text("absent")),
        Expression::eq(sym(), Expression::null()),
        g5_eq.clone(),
        g10_ne.clone(),
        g40_eq.clone(),
        g5_null.clone(),
        absent.clone(),
        Expression::and(sym_b.clone(), g10_ne.clone()),
        Expression::or(g5_null.clone(), g40_eq.clone()),
        Expression::and(
            Expression::or(sym_b, Expression::eq(sym(), Expression::null())),
            Expression::not_expr(g5_eq),
        ),
        Expression::or(absent.clone(), Expression::and(g10_ne, g40_eq)),
    ];

    for (i, rows) in [128, 131].into_iter().enumerate() {
        let seed = 401 + i as u64;
        let table = symbol_geohash_table(rows, seed);
        assert_eq!(check_equivalence(&exprs, &table)?, exprs.len());

        let partitions = Arc::new(vec![Partition::new(table.columns.clone())?]);
        for expr in &exprs {
            let filter = resolve_filter(expr, &table.metadata)?;
            let mut expected = Vec::new();
            select_rows(&filter, &table.frame(0), &mut expected)?;
            if *expr == absent {
                assert!(expected.is_empty());
            }
            for mode in JitMode::all() {
                let source = MemoryFrameSource::from_shared(partitions.clone());
                let (plan, rows) = run_cursor(mode, expr, &table.metadata, Box::new(source))?;
                assert_eq!(rows, expected, "{expr} under {mode} on {plan}");
            }
        }
    }
    Ok(())
}

#[test]
fn test_negation_and_null_grid() -> Result<()> {
    let mut exprs = Vec::new();
    for &a in &NUMERIC {
        let column = Expression::column(a);
        exprs.push(Expression::is_null(column.clone()));
        exprs.push(Expression::is_not_null(column.clone()));
        exprs.push(Expression::eq(column.clone(), Expression::null()));
        exprs.push(Expression::ne(Expression::null(), column.clone()));
        exprs.push(Expression::gt(column.clone(), Expression::null()));
        exprs.push(Expression::is_null(Expression::neg(column.clone())));
        exprs.push(Expression::eq(
            Expression::neg(column.clone()),
            Expression::literal(Value::Int32(-1)),
        ));
        exprs.push(Expression::lt(
            Expression::neg(column.clone()),
            Expression::add_expr(column.clone(), Expression::null()),
        ));
        for &b in &NUMERIC {
            exprs.push(Expression::eq(
                Expression::neg(column.clone()),
                Expression::column(b),
            ));
        }
    }
    for (i, rows) in row_counts().into_iter().enumerate() {
        let table = Table::random(rows, 37 + i as u64);
        assert!(check_equivalence(&exprs, &table)? > 0);
    }
    Ok(())
}

#[test]
fn test_logical_combinations() -> Result<()> {
    let flag = || Expression::column(8);
    let positive = |c: usize| Expression::gt(Expression::column(c), Expression::literal(Value::Int32(0)));
    let exprs = vec![
        flag(),
        Expression::not_expr(flag()),
        Expression::and(flag(), positive(0)),
        Expression::or(positive(1), Expression::is_null(Expression::column(4))),
        Expression::and(
            Expression::or(positive(2), positive(3)),
            Expression::not_expr(Expression::and(positive(5), flag())),
        ),
        Expression::eq(flag(), Expression::literal(Value::Boolean(false))),
        Expression::ne(flag(), Expression::eq(Expression::column(6), Expression::column(7))),
        Expression::or(flag(), Expression::literal(Value::Boolean(true))),
    ];
    for (i, rows) in row_counts().into_iter().enumerate() {
        let table = Table::random(rows, 53 + i as u64);
        assert!(check_equivalence(&exprs, &table)? > 0);
    }
    Ok(())
}

#[test]
fn test_tail_in_isolation() -> Result<()> {
    let exprs = vec![
        Expression::gt(Expression::column(0), Expression::literal(Value::Int32(9))),
        Expression::lt(
            Expression::div_expr(Expression::column(3), Expression::column(0)),
            Expression::column(4),
        ),
        Expression::or(
            Expression::eq(Expression::column(2), Expression::null()),
            Expression::ge(Expression::column(5), Expression::column(1)),
        ),
    ];
    // every remainder of every vector width, including empty frames
    for rows in 0..=19 {
        let table = Table::random(rows, 71 + rows as u64);
        check_equivalence(&exprs, &table)?;
    }
    Ok(())
}

#[test]
fn test_routine_is_reusable_across_threads() -> Result<()> {
    let Some(mode) = codegen_modes().pop() else {
        return Ok(());
    };
    let tables: Vec<Table> = (0..4).map(|i| Table::random(257 + i, 90 + i as u64)).collect();
    let expr = Expression::ge(
        Expression::mul_expr(Expression::column(1), Expression::column(6)),
        Expression::column(2),
    );
    let filter = resolve_filter(&expr, &tables[0].metadata)?;
    let compiled = Arc::new(compile_filter(&filter, mode)?);

    std::thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = tables
            .iter()
            .map(|table| {
                let compiled = Arc::clone(&compiled);
                let filter = &filter;
                scope.spawn(move || -> Result<()> {
                    let frame = table.frame(0);
                    let mut expected = Vec::new();
                    select_rows(filter, &frame, &mut expected)?;
                    for _ in 0..8 {
                        let mut actual = Vec::new();
                        compiled.execute(&frame, &mut actual)?;
                        assert_eq!(actual, expected);
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked")?;
        }
        Ok(())
    })
}

fn run_cursor(
    mode: JitMode,
    expr: &Expression,
    metadata: &[ColumnMeta],
    source: Box<dyn FrameSource>,
) -> Result<(ExecutionPath, Vec<RowId>)> {
    let ctx = ExecutionContext::new(Arc::new(EngineConfig::default())).with_jit_mode(mode);
    let factory = FilterCursorFactory::try_new(&ctx, expr, metadata)?.expect("filter should resolve");
    let mut cursor = factory.cursor(source)?;
    cursor.init()?;
    let mut rows = Vec::new();
    while let Some(row) = cursor.next()? {
        rows.push(row);
    }
    cursor.close();
    factory.close();
    Ok((factory.plan(), rows))
}

#[test]
fn test_null_either_column() -> Result<()> {
    const N: i32 = i32::MIN;
    let metadata = vec![
        ColumnMeta::new("i32a", DataType::Int32),
        ColumnMeta::new("i32b", DataType::Int32),
    ];
    let partition = Partition::new(vec![
        OwnedColumn::Int32(vec![1, N, 3, 4, 5, 6, 7, N, 9, 10, 11]),
        OwnedColumn::Int32(vec![N, 2, 3, N, 5, 6, 7, 8, 9, N, 11]),
    ])?;
    let partitions = Arc::new(vec![partition]);
    let expr = Expression::or(
        Expression::eq(Expression::column(0), Expression::null()),
        Expression::eq(Expression::column(1), Expression::null()),
    );

    for mode in JitMode::all() {
        let source = MemoryFrameSource::from_shared(partitions.clone());
        let (plan, rows) = run_cursor(mode, &expr, &metadata, Box::new(source))?;
        assert_eq!(rows, vec![0, 1, 3, 7, 9], "{mode} on {plan}");
        if mode == JitMode::ForceScalar {
            assert_eq!(plan, ExecutionPath::Interpreter);
        }
        if mode == JitMode::CompiledScalar && jit_supported() {
            assert_eq!(plan, ExecutionPath::CompiledScalar);
        }
    }
    Ok(())
}

#[test]
fn test_all_widths_with_tail() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(131);
    let rows = 131;
    let mut value = |min: i64| -> i64 {
        if rng.gen_ratio(1, 10) {
            min
        } else {
            rng.gen_range(-5..30)
        }
    };
    let i8s: Vec<i8> = (0..rows).map(|_| value(i8::MIN as i64) as i8).collect();
    let i16s: Vec<i16> = (0..rows).map(|_| value(i16::MIN as i64) as i16).collect();
    let i32s: Vec<i32> = (0..rows).map(|_| value(i32::MIN as i64) as i32).collect();
    let i64s: Vec<i64> = (0..rows).map(|_| value(i64::MIN)).collect();

    let expected: Vec<RowId> = (0..rows)
        .filter(|&r| i8s[r] > 9 && i16s[r] > 9 && i32s[r] > 9 && i64s[r] > 9)
        .map(|r| r as RowId)
        .collect();

    let metadata = vec![
        ColumnMeta::new("i8", DataType::Int8),
        ColumnMeta::new("i16", DataType::Int16),
        ColumnMeta::new("i32", DataType::Int32),
        ColumnMeta::new("i64", DataType::Int64),
    ];
    let partitions = Arc::new(vec![Partition::new(vec![
        OwnedColumn::Int8(i8s),
        OwnedColumn::Int16(i16s),
        OwnedColumn::Int32(i32s),
        OwnedColumn::Int64(i64s),
    ])?]);
    let nine = || Expression::literal(Value::Int32(9));
    let expr = Expression::and(
        Expression::and(
            Expression::gt(Expression::column(0), nine()),
            Expression::gt(Expression::column(1), nine()),
        ),
        Expression::and(
            Expression::gt(Expression::column(2), nine()),
            Expression::gt(Expression::column(3), nine()),
        ),
    );

    for mode in JitMode::all() {
        let source = MemoryFrameSource::from_shared(partitions.clone());
        let (_, rows) = run_cursor(mode, &expr, &metadata, Box::new(source))?;
        assert_eq!(rows, expected, "{mode}");
    }
    Ok(())
}

#[test]
fn test_modes_agree_over_partitions() -> Result<()> {
    let tables: Vec<Table> = [0usize, 128, 131, 7, 300]
        .iter()
        .enumerate()
        .map(|(i, &rows)| Table::random(rows, 200 + i as u64))
        .collect();
    let metadata = tables[0].metadata.clone();
    let partitions = Arc::new(
        tables
            .into_iter()
            .map(|t| Partition::new(t.columns))
            .collect::<Result<Vec<_>>>()?,
    );
    let exprs = [
        Expression::lt(
            Expression::add_expr(Expression::column(0), Expression::column(1)),
            Expression::column(4),
        ),
        Expression::and(
            Expression::column(8),
            Expression::ne(Expression::column(3), Expression::column(7)),
        ),
    ];

    for expr in &exprs {
        let mut results = Vec::new();
        for mode in JitMode::all() {
            for frame_rows in [0, 64, 100] {
                let source =
                    MemoryFrameSource::from_shared(partitions.clone()).with_max_frame_rows(frame_rows);
                let (_, rows) = run_cursor(mode, expr, &metadata, Box::new(source))?;
                assert!(rows.windows(2).all(|w| w[0] < w[1]));
                results.push(rows);
            }
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]), "{expr}");
    }
    Ok(())
}

#[test]
fn test_reset_reproduces_sequence() -> Result<()> {
    let table = Table::random(517, 5);
    let metadata = table.metadata.clone();
    let partitions = Arc::new(vec![Partition::new(table.columns)?]);
    let expr = Expression::or(
        Expression::ge(Expression::column(5), Expression::column(2)),
        Expression::is_null(Expression::column(1)),
    );

    for mode in JitMode::all() {
        let ctx = ExecutionContext::default().with_jit_mode(mode);
        let factory = FilterCursorFactory::try_new(&ctx, &expr, &metadata)?.expect("filter should resolve");
        let mut cursor = factory.cursor(Box::new(MemoryFrameSource::from_shared(partitions.clone())))?;
        cursor.init()?;
        let mut first = Vec::new();
        while let Some(row) = cursor.next()? {
            first.push(row);
        }
        for _ in 0..3 {
            cursor.to_top()?;
            let mut again = Vec::new();
            while let Some(row) = cursor.next()? {
                again.push(row);
            }
            assert_eq!(again, first, "{mode}");
        }
        cursor.close();
    }
    Ok(())
}
