//! Bounding a loop counter.
//!
//! Analyzes the head of
//!
//! ```text
//! i := 0; x := 0
//! while (i < bound) { i := i + 1; x := x + step }
//! ```
//!
//! with the full domain stack. Widening alone loses the upper bound of `i`;
//! the guard is collected as a threshold and restores it, and the gauge ties
//! `x` to `i`.
//!
//! Run with: `cargo run --example loop_counter -- --bound 100 --step 2`

use clap::Parser;
use log::info;

use numeric_domains::domain::NumericDomain;
use numeric_domains::expr::{Assign, Test};
use numeric_domains::gauge::Gauge;
use numeric_domains::intervals::Intervals;
use numeric_domains::linear::Linear;
use numeric_domains::predicates::Predicates;
use numeric_domains::thresholds::Thresholds;
use numeric_domains::types::{NumVar, ProgramPoint, VarType};

type Stack = Thresholds<Predicates<Gauge<Intervals>>>;

const HEAD: u64 = 0x1000;
const GUARD: u64 = 0x1004;
const BODY: u64 = 0x1008;
const EXIT: u64 = 0x1010;

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Loop bound.
    #[arg(long, value_name = "INT", default_value = "100")]
    bound: i64,

    /// Increment of the dependent variable.
    #[arg(long, value_name = "INT", default_value = "2")]
    step: i64,

    /// Maximum number of iterations at the loop head.
    #[arg(long, value_name = "INT", default_value = "10")]
    iterations: usize,

    /// Print the full domain tree of the loop head.
    #[arg(long)]
    dump: bool,
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

    let i = NumVar::new(1);
    let x = NumVar::new(2);
    let guard = Test::less_than(&Linear::var(i), &Linear::constant(args.bound));
    let exit = Test::less_or_equal(&Linear::constant(args.bound), &Linear::var(i));

    let init = Stack::empty()
        .introduce(i, VarType::Zeno, None)?
        .introduce(x, VarType::Zeno, None)?
        .eval_assign(&Assign::constant(i, 0))?
        .eval_assign(&Assign::constant(x, 0))?;

    let mut head = init.with_location(ProgramPoint::new(HEAD));
    for iteration in 1..=args.iterations {
        let body = head
            .with_location(ProgramPoint::new(GUARD))
            .eval_test(&guard)?
            .with_location(ProgramPoint::new(BODY))
            .eval_assign(&Assign::increment(i, 1))?
            .eval_assign(&Assign::increment(x, args.step))?;
        let next = head.join(&body)?.with_location(ProgramPoint::new(HEAD));
        let widened = head.widen(&next)?;
        info!(
            "iteration {}: i ∈ {}, x ∈ {}",
            iteration,
            widened.query_range(&Linear::var(i)),
            widened.query_range(&Linear::var(x))
        );
        let stable = widened.subset_or_equal(&head)?;
        head = widened;
        if stable {
            println!("Fixpoint reached after {} iterations", iteration);
            break;
        }
    }

    println!("head: {}", head);
    if args.dump {
        println!("{}", head.dump());
    }

    match head.with_location(ProgramPoint::new(EXIT)).eval_test(&exit) {
        Ok(after) => println!(
            "after the loop: i ∈ {}, x ∈ {}",
            after.query_range(&Linear::var(i)),
            after.query_range(&Linear::var(x))
        ),
        Err(e) if e.is_unreachable() => println!("the loop never exits"),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
