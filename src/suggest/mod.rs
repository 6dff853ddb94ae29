//! The suggestion engine: per-aspect prompt assembly, token budgeting, and
//! batch-level concurrent document processing. See `SPEC_FULL.md` §4.2.

pub mod aspects;
pub mod engine;
pub mod tokens;

pub use aspects::{Aspect, AspectContext, AspectOutput};
pub use engine::{Templates, generate_batch};
