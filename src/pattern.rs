//! Pattern matching for `LIKE` and `CONTAINS` predicates.
//!
//! - **like**: pattern compilation into chunks, regex translation and the
//!   optimization-level analysis
//! - **scanner**: Boyer–Moore–Horspool runs over UTF-16 code units
//! - **fulltext**: whole-word containment search with a pluggable word breaker

pub mod fulltext;
pub mod like;
pub mod scanner;

pub use fulltext::{DefaultWordBreaker, FullTextQuery, WordBreaker};
pub use like::{Chunk, LikePattern, OptimizationLevel, PrefixConstraint};
pub use scanner::{CharSet, ChunkScanner, Run, RunItem};
