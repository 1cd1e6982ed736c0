//! Computed label values and assembled rows.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{LabelId, LabelValueId, RunId};

/// The persisted result of computing one label for one run, for one
/// iteration branch.
///
/// Never mutated after creation; recomputation replaces the full set of
/// values for a `(label, run)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelValue {
    pub id: LabelValueId,
    pub label_id: LabelId,
    pub run_id: RunId,
    /// Scalar, object, or array
    pub value: Value,
    /// True when this value is one element of an iteration branch rather
    /// than a whole collection
    pub is_iterated: bool,
    /// Ids of the upstream values whose iteration branches produced this row
    pub lineage: Vec<LabelValueId>,
}

impl LabelValue {
    /// Create a non-iterated value with no lineage.
    pub fn new(label_id: LabelId, run_id: RunId, value: Value) -> Self {
        Self {
            id: LabelValueId::new(),
            label_id,
            run_id,
            value,
            is_iterated: false,
            lineage: Vec::new(),
        }
    }

    /// Mark as one element of an iteration branch.
    pub fn iterated(mut self) -> Self {
        self.is_iterated = true;
        self
    }

    /// Attach upstream lineage pointers.
    pub fn with_lineage(mut self, lineage: Vec<LabelValueId>) -> Self {
        self.lineage = lineage;
        self
    }
}

/// A flattened row assembled by joining label values along shared lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueMap {
    pub run_id: RunId,
    /// Iteration identity: the base label value this row was built from
    pub base: LabelValueId,
    /// Field name to value, in merge order
    pub fields: IndexMap<String, Value>,
}

impl ValueMap {
    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
