//! # numeric-domains: Composable numeric abstract domains
//!
//! **`numeric-domains`** is the numeric core of a binary-program static analyzer: a stack of abstract
//! domains that jointly over-approximate the values integer variables may take at every program point.
//!
//! ## How domains compose
//!
//! Every domain implements [`NumericDomain`][crate::domain::NumericDomain]. A *leaf* domain
//! ([`Intervals`][crate::intervals::Intervals], [`IntervalSets`][crate::interval_sets::IntervalSets])
//! stores values directly. A *functor* domain wraps a child domain: it decides locally how an operation
//! affects its own state, queues the effects this has on the child as [`ChildOps`][crate::domain::ChildOps],
//! and lets the child evaluate the operation afterwards. Stacks are plain nested generic types:
//!
//! ```rust
//! use numeric_domains::domain::NumericDomain;
//! use numeric_domains::expr::{Assign, Test};
//! use numeric_domains::gauge::Gauge;
//! use numeric_domains::interval::Interval;
//! use numeric_domains::intervals::Intervals;
//! use numeric_domains::linear::Linear;
//! use numeric_domains::predicates::Predicates;
//! use numeric_domains::types::{NumVar, VarType};
//!
//! type Stack = Predicates<Gauge<Intervals>>;
//!
//! let x = NumVar::new(1);
//! let low = Stack::empty()
//!     .introduce(x, VarType::Zeno, None)?
//!     .eval_assign(&Assign::constant(x, 3))?;
//! let high = low.eval_assign(&Assign::constant(x, 12))?;
//!
//! // The join is convex, but remembers that x is never between 4 and 11.
//! let joined = low.join(&high)?;
//! assert_eq!(joined.query_range(&Linear::var(x)), Interval::of(3, 12));
//! let six = Test::equal(&Linear::var(x), &Linear::constant(6));
//! assert!(joined.eval_test(&six).unwrap_err().is_unreachable());
//! # Ok::<(), numeric_domains::error::DomainError>(())
//! ```
//!
//! ## Core Components
//!
//! - **[`domain`]**: the protocol, child operations and lattice-law test helpers.
//! - **[`intervals`]**, **[`interval_sets`]**: leaf domains, feeding lost bounds to [`synthesis`].
//! - **[`gauge`]**: loop counters and the linear bounds of the variables that follow them.
//! - **[`predicates`]**: implications between tests, with syntactic and semantic entailment.
//! - **[`thresholds`]**: redundant tests collected as narrowing thresholds for widening.
//! - **[`stripes`]**: linear equations kept syntactically through special variables.
//!
//! Unreachable states are reported as [`DomainError::Unreachable`][crate::error::DomainError::Unreachable],
//! never as a panic.

pub mod debug;
pub mod domain;
pub mod error;
pub mod expr;
pub mod gauge;
pub mod interval;
pub mod interval_sets;
pub mod intervals;
pub mod linear;
pub mod pmap;
pub mod predicates;
pub mod stripes;
pub mod synth;
pub mod synthesis;
pub mod thresholds;
pub mod types;
