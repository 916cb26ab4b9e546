//! Aggregate functions.
//!
//! - **accumulator**: per-group state machines with serializable partial state
//! - **group**: driving a set of accumulators over sorted input and merging
//!   partial results

pub mod accumulator;
pub mod group;

pub use accumulator::{
    AggregateAccumulator, AggregateFunction, CountShortcut, GroupPhase, PartialState, QueryShape,
};
pub use group::{aggregate_sorted, merge_sorted, AggregateSet};
