//! The computation pipeline - the core of the library.
//!
//! For each label, in dependency order:
//! - Resolution (JSONPath / metadata / upstream-label extraction)
//! - Combination (zip or NxN bundling of multi-valued results)
//! - Reduction (optional user script per bundle)
//! - Persistence with lineage
//!
//! Plus the read side: row assembly over stored values.

pub mod combine;
pub mod engine;
pub mod reduce;
pub mod resolve;
pub mod rows;

pub use combine::{combine, Bundle};
pub use engine::{ComputeReport, Engine, RecomputeReport};
pub use reduce::{reduce, RowOutput};
pub use resolve::{
    resolve_extractors, ComputedValues, IterationKey, IterationSource, ResolvedExtractor,
    ResolvedPair,
};
pub use rows::RowAssembler;
