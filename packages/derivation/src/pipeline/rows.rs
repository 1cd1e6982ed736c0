//! Row assembly - flattened, schema-grouped views over stored values.
//!
//! A group's rows start from the values of the label(s) targeting it.
//! Every other label value connected to a base row through lineage -
//! ancestors the row was derived from, and descendants derived from it -
//! merges into the row under its label name. Rows of different labels
//! sharing an upstream lineage path collapse into one object, which is
//! how a nested target-group chain flattens to one row per innermost
//! iteration; sibling leaves of one label always stay separate rows.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::traits::LabelValueStore;
use crate::types::{GroupId, LabelId, LabelValue, LabelValueId, RunId, ValueMap};

/// Read-only join layer over the label value store.
///
/// Runs fully concurrently with computation of other runs; the store's
/// atomic replace guarantees it never sees a half-written label.
pub struct RowAssembler<'a, S: LabelValueStore> {
    graph: &'a DependencyGraph,
    store: &'a S,
}

impl<'a, S: LabelValueStore> RowAssembler<'a, S> {
    pub fn new(graph: &'a DependencyGraph, store: &'a S) -> Self {
        Self { graph, store }
    }

    /// Flattened rows of a target group for one run.
    ///
    /// `include` empty means all labels; `exclude` wins over `include`.
    pub async fn rows_for_group(
        &self,
        group: GroupId,
        run: RunId,
        include: &[&str],
        exclude: &[&str],
    ) -> Result<Vec<ValueMap>> {
        let values = self.store.values_for_run(run).await?;
        let by_id: HashMap<LabelValueId, &LabelValue> =
            values.iter().map(|v| (v.id, v)).collect();

        let base_labels: HashSet<_> = self
            .graph
            .labels_targeting(group)
            .into_iter()
            .map(|l| l.id)
            .collect();

        let admits = |name: &str| -> bool {
            if exclude.contains(&name) {
                return false;
            }
            include.is_empty() || include.contains(&name)
        };

        let mut rows: Vec<(MergeKey, ValueMap)> = Vec::new();
        // Per (label, lineage) leaf counter: the nth leaf of one base
        // label pairs with the nth leaf of another, never with a sibling
        // of its own label.
        let mut leaf_slots: HashMap<(LabelId, Vec<LabelValueId>), usize> = HashMap::new();
        for base in values.iter().filter(|v| base_labels.contains(&v.label_id)) {
            let Some(base_label) = self.graph.label(base.label_id) else {
                warn!(value = %base.id, "value of an unknown label; skipped");
                continue;
            };

            let mut fields: IndexMap<String, Value> = IndexMap::new();
            match &base.value {
                Value::Object(map) => {
                    for (k, v) in map {
                        fields.insert(k.clone(), v.clone());
                    }
                }
                other => {
                    fields.insert(base_label.name.clone(), other.clone());
                }
            }

            // Ancestors: values this row was derived from.
            for ancestor_id in transitive_lineage(base, &by_id) {
                let Some(ancestor) = by_id.get(&ancestor_id) else {
                    continue;
                };
                self.merge(&mut fields, ancestor, &admits);
            }

            // Descendants: values derived from this row.
            for value in &values {
                if value.id == base.id || base_labels.contains(&value.label_id) {
                    continue;
                }
                if transitive_lineage(value, &by_id).contains(&base.id) {
                    self.merge(&mut fields, value, &admits);
                }
            }

            let key = if base.lineage.is_empty() {
                // A base row with no upstream lineage is its own leaf.
                MergeKey::Own(base.id)
            } else {
                let mut lineage = base.lineage.clone();
                lineage.sort();
                let slot = leaf_slots
                    .entry((base.label_id, lineage.clone()))
                    .or_insert(0);
                let leaf = *slot;
                *slot += 1;
                MergeKey::Lineage(lineage, leaf)
            };

            if let Some((_, existing)) = rows.iter_mut().find(|(k, _)| *k == key) {
                // Rows of different labels sharing one upstream lineage
                // path merge.
                for (name, value) in fields {
                    existing.fields.entry(name).or_insert(value);
                }
            } else {
                rows.push((
                    key,
                    ValueMap {
                        run_id: run,
                        base: base.id,
                        fields,
                    },
                ));
            }
        }

        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    fn merge(
        &self,
        fields: &mut IndexMap<String, Value>,
        value: &LabelValue,
        admits: &impl Fn(&str) -> bool,
    ) {
        let Some(label) = self.graph.label(value.label_id) else {
            return;
        };
        if admits(&label.name) {
            fields.insert(label.name.clone(), value.value.clone());
        }
    }

    /// Values among descendant labels whose lineage contains the given
    /// value at exactly `depth` levels of indirection (0 = direct).
    pub async fn derived_values(
        &self,
        value: &LabelValue,
        depth: usize,
    ) -> Result<Vec<LabelValue>> {
        let descendants: HashSet<_> = self
            .graph
            .descendants(value.label_id)
            .into_iter()
            .filter(|&l| l != value.label_id)
            .collect();

        let values = self.store.values_for_run(value.run_id).await?;
        let by_id: HashMap<LabelValueId, &LabelValue> =
            values.iter().map(|v| (v.id, v)).collect();

        Ok(values
            .iter()
            .filter(|v| descendants.contains(&v.label_id))
            .filter(|v| lineage_at_depth(v, depth, &by_id).contains(&value.id))
            .cloned()
            .collect())
    }
}

#[derive(PartialEq, Eq)]
enum MergeKey {
    Own(LabelValueId),
    /// Sorted lineage set plus the leaf's ordinal within its own label.
    Lineage(Vec<LabelValueId>, usize),
}

/// The full transitive lineage closure of a value.
fn transitive_lineage(
    value: &LabelValue,
    by_id: &HashMap<LabelValueId, &LabelValue>,
) -> HashSet<LabelValueId> {
    let mut seen = HashSet::new();
    let mut queue: Vec<LabelValueId> = value.lineage.clone();
    while let Some(id) = queue.pop() {
        if seen.insert(id) {
            if let Some(upstream) = by_id.get(&id) {
                queue.extend(upstream.lineage.iter().copied());
            }
        }
    }
    seen
}

/// Lineage ids reachable in exactly `depth + 1` steps.
fn lineage_at_depth(
    value: &LabelValue,
    depth: usize,
    by_id: &HashMap<LabelValueId, &LabelValue>,
) -> HashSet<LabelValueId> {
    let mut level: HashSet<LabelValueId> = value.lineage.iter().copied().collect();
    for _ in 0..depth {
        level = level
            .iter()
            .filter_map(|id| by_id.get(id))
            .flat_map(|v| v.lineage.iter().copied())
            .collect();
    }
    level
}
