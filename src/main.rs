//! VibeJIT - filter path diagnostics
//!
//! Generates a random partitioned table, runs a set of filters under every
//! execution mode and checks that all modes select the same rows.

use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Instant;
use vibejit::access::{
    ColumnMeta, DataType, MemoryFrameSource, OwnedColumn, Partition, RowId, SymbolDictionary, Value,
};
use vibejit::executor::{ExecutionContext, FilterCursorFactory, JitMode, RowCursor};
use vibejit::expression::Expression;
use vibejit::jit::features;
use vibejit::EngineConfig;

const SYMBOLS: [&str; 4] = ["EUR", "USD", "GBP", "JPY"];

/// VibeJIT - compare compiled and interpreted filters on random data
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Total number of rows
    #[arg(short, long, default_value = "1000003")]
    rows: usize,

    /// Number of partitions the rows are split into
    #[arg(short, long, default_value = "4")]
    partitions: usize,

    /// Seed for the data generator
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Run only this mode (auto, vectorized, scalar, compiled-scalar); all modes by default
    #[arg(short, long)]
    mode: Option<JitMode>,

    /// Upper bound on rows per routine call
    #[arg(long, default_value_t = vibejit::config::DEFAULT_MAX_FRAME_ROWS)]
    max_frame_rows: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = Arc::new(EngineConfig::default().with_max_frame_rows(args.max_frame_rows));
    config.validate().context("Invalid configuration")?;

    println!("VibeJIT filter diagnostics");
    println!("   - Host: {}", features::describe());
    println!("   - Rows: {} in {} partitions", args.rows, args.partitions.max(1));
    println!("   - Seed: {}", args.seed);
    println!();

    let symbols = Arc::new(SymbolDictionary::from_values(SYMBOLS));
    let metadata = metadata(symbols);
    let partitions = Arc::new(generate(&args, &metadata)?);

    let modes: Vec<JitMode> = match args.mode {
        Some(mode) => vec![mode],
        None => JitMode::all().to_vec(),
    };

    let mut mismatches = 0;
    for (name, expr) in scenarios() {
        println!("{name}: {expr}");
        let mut reference: Option<(JitMode, Vec<RowId>)> = None;
        for &mode in &modes {
            let ctx = ExecutionContext::new(config.clone()).with_jit_mode(mode);
            let Some(factory) = FilterCursorFactory::try_new(&ctx, &expr, &metadata)
                .with_context(|| format!("Failed to build filter '{name}'"))?
            else {
                println!("   {mode:<10} not handled, left to the planner");
                continue;
            };

            let source = MemoryFrameSource::from_shared(partitions.clone());
            let mut cursor = factory.cursor(Box::new(source))?;
            let started = Instant::now();
            cursor.init()?;
            let mut rows = Vec::new();
            while let Some(row) = cursor.next()? {
                rows.push(row);
            }
            let elapsed = started.elapsed();
            cursor.close();
            factory.close();

            println!(
                "   {:<10} {:<16} {:>9} rows  {:>10.3} ms",
                mode.as_str(),
                factory.plan().as_str(),
                rows.len(),
                elapsed.as_secs_f64() * 1000.0
            );

            match &reference {
                None => reference = Some((mode, rows)),
                Some((first, expected)) if *expected != rows => {
                    mismatches += 1;
                    let at = expected
                        .iter()
                        .zip(&rows)
                        .position(|(a, b)| a != b)
                        .unwrap_or_else(|| expected.len().min(rows.len()));
                    println!("   MISMATCH between {first} and {mode} at match #{at}");
                }
                Some(_) => {}
            }
        }
        println!();
    }

    if mismatches > 0 {
        bail!("{} scenario/mode pairs disagreed", mismatches);
    }
    println!("All modes agree.");
    Ok(())
}

fn metadata(symbols: Arc<SymbolDictionary>) -> Vec<ColumnMeta> {
    vec![
        ColumnMeta::new("i8", DataType::Int8),
        ColumnMeta::new("i16", DataType::Int16),
        ColumnMeta::new("i32a", DataType::Int32),
        ColumnMeta::new("i32b", DataType::Int32),
        ColumnMeta::new("i64", DataType::Int64),
        ColumnMeta::new("f32", DataType::Float32),
        ColumnMeta::new("f64", DataType::Float64),
        ColumnMeta::new("flag", DataType::Boolean),
        ColumnMeta::new("ccy", DataType::Symbol).with_symbols(symbols),
        ColumnMeta::new("geo", DataType::GeoHash { bits: 20 }),
    ]
}

/// Random partitions; roughly one value in sixteen is null
fn generate(args: &Args, metadata: &[ColumnMeta]) -> Result<Vec<Partition>> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let count = args.partitions.max(1);
    let mut partitions = Vec::with_capacity(count);

    for p in 0..count {
        let rows = args.rows / count + usize::from(p < args.rows % count);
        let mut columns = Vec::with_capacity(metadata.len());
        for meta in metadata {
            let null = |rng: &mut StdRng| meta.nullable && rng.gen_ratio(1, 16);
            let column = match meta.data_type {
                DataType::Int8 => OwnedColumn::Int8(
                    (0..rows)
                        .map(|_| if null(&mut rng) { i8::MIN } else { rng.gen_range(-20..=20) })
                        .collect(),
                ),
                DataType::Int16 => OwnedColumn::Int16(
                    (0..rows)
                        .map(|_| if null(&mut rng) { i16::MIN } else { rng.gen_range(-300..=300) })
                        .collect(),
                ),
                DataType::Int32 => OwnedColumn::Int32(
                    (0..rows)
                        .map(|_| if null(&mut rng) { i32::MIN } else { rng.gen_range(-1000..=1000) })
                        .collect(),
                ),
                DataType::Int64 => OwnedColumn::Int64(
                    (0..rows)
                        .map(|_| if null(&mut rng) { i64::MIN } else { rng.gen() })
                        .collect(),
                ),
                DataType::Float32 => OwnedColumn::Float32(
                    (0..rows)
                        .map(|_| if null(&mut rng) { f32::NAN } else { rng.gen_range(-50.0..50.0) })
                        .collect(),
                ),
                DataType::Float64 => OwnedColumn::Float64(
                    (0..rows)
                        .map(|_| if null(&mut rng) { f64::NAN } else { rng.gen_range(-50.0..50.0) })
                        .collect(),
                ),
                DataType::Boolean => OwnedColumn::Boolean((0..rows).map(|_| rng.gen()).collect()),
                DataType::Symbol => OwnedColumn::Int32(
                    (0..rows)
                        .map(|_| {
                            if null(&mut rng) {
                                i32::MIN
                            } else {
                                rng.gen_range(0..SYMBOLS.len() as i32)
                            }
                        })
                        .collect(),
                ),
                DataType::GeoHash { .. } => OwnedColumn::Int32(
                    (0..rows)
                        .map(|_| if null(&mut rng) { -1 } else { rng.gen_range(0..16) })
                        .collect(),
                ),
                other => bail!("no generator for {} columns", other),
            };
            columns.push(column);
        }
        partitions.push(Partition::new(columns)?);
    }
    Ok(partitions)
}

fn scenarios() -> Vec<(&'static str, Expression)> {
    let col = Expression::column;
    let int = |v: i32| Expression::literal(Value::Int32(v));
    vec![
        (
            "null either",
            Expression::or(
                Expression::eq(col(2), Expression::null()),
                Expression::eq(col(3), Expression::null()),
            ),
        ),
        (
            "all widths above nine",
            Expression::and(
                Expression::and(Expression::gt(col(0), int(9)), Expression::gt(col(1), int(9))),
                Expression::and(
                    Expression::gt(col(2), int(9)),
                    Expression::gt(col(4), Expression::literal(Value::Int64(9))),
                ),
            ),
        ),
        (
            "mixed arithmetic",
            Expression::lt(
                Expression::add_expr(Expression::mul_expr(col(0), col(1)), col(2)),
                Expression::div_expr(col(3), int(7)),
            ),
        ),
        (
            "float promotion",
            Expression::ge(
                Expression::sub_expr(col(5), col(1)),
                Expression::mul_expr(col(6), Expression::literal(Value::Float64(0.5))),
            ),
        ),
        (
            "negation",
            Expression::eq(Expression::neg(col(2)), Expression::neg(col(3))),
        ),
        (
            "symbol and flag",
            Expression::and(
                col(7),
                Expression::ne(col(8), Expression::literal(Value::String("USD".to_string()))),
            ),
        ),
        (
            "geohash",
            Expression::or(
                Expression::eq(col(9), Expression::literal(Value::GeoHash { bits: 20, value: 3 })),
                Expression::is_null(col(9)),
            ),
        ),
        (
            "division by column",
            Expression::not_expr(Expression::is_null(Expression::div_expr(col(2), col(0)))),
        ),
    ]
}
