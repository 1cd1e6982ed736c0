//! Domain types for the derivation engine.

pub mod config;
pub mod group;
pub mod label;
pub mod run;
pub mod value;

pub use config::EngineConfig;
pub use group::Group;
pub use label::{CombinationMode, Extractor, ExtractorSource, Label, ScalarMethod};
pub use run::Run;
pub use value::{LabelValue, ValueMap};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a [`Group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub Uuid);

/// Identifier of a [`Label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(pub Uuid);

/// Identifier of a [`Run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

/// Opaque identifier of a [`LabelValue`].
///
/// Lineage pointers are lists of these ids rather than live references,
/// keeping the value DAG serializable and free of ownership cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelValueId(pub Uuid);

macro_rules! impl_id {
    ($id:ident) => {
        impl $id {
            /// Generate a fresh (v7, time-ordered) id.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $id {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

impl_id!(GroupId);
impl_id!(LabelId);
impl_id!(RunId);
impl_id!(LabelValueId);
