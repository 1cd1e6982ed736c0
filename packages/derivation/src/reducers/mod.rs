//! Reducer engine implementations.

pub mod quickjs;

pub use quickjs::QuickJsReducer;
