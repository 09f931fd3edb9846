//! Remembering a gap in a convex join.
//!
//! Joins the states `x ∈ [low, low + width]` and `x ∈ [high, high + width]`
//! and probes every value in between. Plain intervals accept all of them;
//! with predicates on top, values in the gap are reported unreachable.
//!
//! Run with: `cargo run --example lost_bound -- --widen`

use clap::Parser;

use numeric_domains::domain::NumericDomain;
use numeric_domains::error::reachable;
use numeric_domains::expr::{Assign, Rhs, Test};
use numeric_domains::interval::Interval;
use numeric_domains::intervals::Intervals;
use numeric_domains::linear::Linear;
use numeric_domains::predicates::Predicates;
use numeric_domains::types::{NumVar, VarType};

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Lower end of the first range.
    #[arg(long, value_name = "INT", default_value = "0")]
    low: i64,

    /// Lower end of the second range.
    #[arg(long, value_name = "INT", default_value = "10")]
    high: i64,

    /// Width of both ranges.
    #[arg(long, value_name = "INT", default_value = "5")]
    width: i64,

    /// Combine the states by widening instead of join.
    #[arg(long)]
    widen: bool,
}

fn ranged<D: NumericDomain>(x: NumVar, low: i64, width: i64) -> color_eyre::Result<D> {
    Ok(D::empty()
        .introduce(x, VarType::Zeno, None)?
        .eval_assign(&Assign::new(x, Rhs::range(Interval::of(low, low + width))))?)
}

fn combine<D: NumericDomain>(args: &Cli, x: NumVar) -> color_eyre::Result<D> {
    let first: D = ranged(x, args.low, args.width)?;
    let second: D = ranged(x, args.high, args.width)?;
    let combined = if args.widen {
        first.widen(&second)?
    } else {
        first.join(&second)?
    };
    Ok(combined)
}

/// Values of `x` in `low..=high` for which `x = v` is still reachable.
fn feasible<D: NumericDomain>(state: &D, x: NumVar, low: i64, high: i64) -> color_eyre::Result<Vec<i64>> {
    let mut values = Vec::new();
    for v in low..=high {
        let probe = Test::equal(&Linear::var(x), &Linear::constant(v));
        if reachable(state.eval_test(&probe))?.is_some() {
            values.push(v);
        }
    }
    Ok(values)
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let args = Cli::parse();
    println!("args = {:?}", args);
    color_eyre::eyre::ensure!(
        args.low + args.width < args.high,
        "the ranges must be disjoint and ordered"
    );

    let x = NumVar::new(1);
    let (probe_low, probe_high) = (args.low, args.high + args.width);

    let plain: Intervals = combine(&args, x)?;
    println!("intervals:  {}", plain);
    println!("  feasible: {:?}", feasible(&plain, x, probe_low, probe_high)?);

    let predicates: Predicates<Intervals> = combine(&args, x)?;
    println!("predicates: {}", predicates);
    println!("  feasible: {:?}", feasible(&predicates, x, probe_low, probe_high)?);

    Ok(())
}
