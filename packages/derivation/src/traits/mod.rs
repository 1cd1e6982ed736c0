//! Core trait abstractions the engine is generic over.

pub mod reducer;
pub mod store;

pub use reducer::ReducerEngine;
pub use store::LabelValueStore;
