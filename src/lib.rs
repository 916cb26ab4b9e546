pub mod aggregate;
pub mod catalog;
pub mod context;
pub mod expression;
pub mod pattern;
pub mod value;
