//! Value layer: the closed set of SQL types and the cells that hold them.
//!
//! - **DataType**: the type lattice (rank order, compatibility, max-type promotion)
//! - **Value** / **Cell**: scalar values and typed nullable storage slots
//! - **convert**: the type-to-type conversion service
//! - **arith**: typed arithmetic and comparison

pub mod arith;
pub mod cell;
pub mod convert;
pub mod data_type;

pub use arith::{arithmetic, compare_strings, compare_values};
pub use cell::{Cell, Value, MONEY_SCALE};
pub use convert::{can_convert, convert};
pub use data_type::DataType;
