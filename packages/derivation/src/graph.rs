//! Label dependency graph - ordering, binding, and closures.
//!
//! Labels reference each other through their extractors. Before any
//! computation starts for a run, the graph is built once: every reference
//! is bound to a concrete label, cycles and self-references are rejected,
//! and a deterministic topological order is fixed. Later labels in the
//! order read earlier labels' freshly stored values, so the ordering is an
//! invariant of the engine, not an optimization.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{ExtractorSource, GroupId, Label, LabelId};

/// A validated, topologically ordered set of labels.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Labels in definition order
    labels: IndexMap<LabelId, Label>,
    /// Direct dependencies (labels this one's extractors draw from)
    deps: HashMap<LabelId, Vec<LabelId>>,
    /// Reverse edges (labels whose extractors draw from this one)
    dependents: HashMap<LabelId, Vec<LabelId>>,
    /// Resolved binding of each `LabelRef` extractor: (label, extractor
    /// index) -> upstream label
    bindings: HashMap<(LabelId, usize), LabelId>,
    /// Topological order: dependencies before dependents
    order: Vec<LabelId>,
}

impl DependencyGraph {
    /// Build and validate the graph for a set of labels.
    ///
    /// Fails fast on self-references, cycles, and unresolved or ambiguous
    /// name bindings; no computation may start when this errors.
    pub fn build(labels: &[Label]) -> ConfigResult<Self> {
        let labels: IndexMap<LabelId, Label> =
            labels.iter().map(|l| (l.id, l.clone())).collect();

        let mut by_name: HashMap<&str, Vec<&Label>> = HashMap::new();
        for label in labels.values() {
            by_name.entry(label.name.as_str()).or_default().push(label);
        }

        let mut deps: HashMap<LabelId, Vec<LabelId>> = HashMap::new();
        let mut dependents: HashMap<LabelId, Vec<LabelId>> = HashMap::new();
        let mut bindings = HashMap::new();
        for id in labels.keys() {
            deps.insert(*id, Vec::new());
            dependents.insert(*id, Vec::new());
        }

        let mut add_edge = |deps: &mut HashMap<LabelId, Vec<LabelId>>,
                            dependents: &mut HashMap<LabelId, Vec<LabelId>>,
                            from: LabelId,
                            to: LabelId| {
            let list = deps.get_mut(&from).unwrap();
            if !list.contains(&to) {
                list.push(to);
                dependents.get_mut(&to).unwrap().push(from);
            }
        };

        for label in labels.values() {
            for (idx, extractor) in label.extractors.iter().enumerate() {
                match &extractor.source {
                    ExtractorSource::LabelRef {
                        label: name,
                        source_group,
                        ..
                    } => {
                        let upstream = resolve_reference(label, name, *source_group, &by_name)?;
                        if upstream == label.id {
                            return Err(ConfigError::SelfReference {
                                label: label.name.clone(),
                            });
                        }
                        bindings.insert((label.id, idx), upstream);
                        add_edge(&mut deps, &mut dependents, label.id, upstream);
                    }
                    ExtractorSource::RawPath { .. } | ExtractorSource::MetadataPath { .. } => {
                        // A raw/metadata path in a nested target-group
                        // context depends on the label establishing that
                        // context: its rows are the documents the path
                        // evaluates against.
                        for base in labels.values() {
                            if base.id != label.id && base.target_group == Some(label.group_id) {
                                add_edge(&mut deps, &mut dependents, label.id, base.id);
                            }
                        }
                    }
                }
            }
        }

        let order = topo_order(&labels, &deps, &dependents)?;

        Ok(Self {
            labels,
            deps,
            dependents,
            bindings,
            order,
        })
    }

    /// Labels in topological order (dependencies first).
    pub fn order(&self) -> &[LabelId] {
        &self.order
    }

    /// Look up a label by id.
    pub fn label(&self, id: LabelId) -> Option<&Label> {
        self.labels.get(&id)
    }

    /// All labels, in definition order.
    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.values()
    }

    /// The upstream label a `LabelRef` extractor is bound to.
    pub fn binding(&self, label: LabelId, extractor: usize) -> Option<LabelId> {
        self.bindings.get(&(label, extractor)).copied()
    }

    /// Direct dependencies of a label, in extractor order.
    pub fn dependencies(&self, id: LabelId) -> &[LabelId] {
        self.deps.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Labels whose rows are the base rows of `group` (their
    /// `target_group` equals it).
    pub fn labels_targeting(&self, group: GroupId) -> Vec<&Label> {
        self.labels
            .values()
            .filter(|l| l.target_group == Some(group))
            .collect()
    }

    /// Reflexive transitive closure of labels referencing `id`, directly
    /// or indirectly. Used for cache invalidation and UI traversal.
    pub fn descendants(&self, id: LabelId) -> Vec<LabelId> {
        self.closure(id, &self.dependents)
    }

    /// Reflexive transitive closure of labels `id` depends on.
    pub fn ancestors(&self, id: LabelId) -> Vec<LabelId> {
        self.closure(id, &self.deps)
    }

    fn closure(&self, id: LabelId, edges: &HashMap<LabelId, Vec<LabelId>>) -> Vec<LabelId> {
        let mut seen: HashSet<LabelId> = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(id);
        queue.push_back(id);
        while let Some(current) = queue.pop_front() {
            for &next in edges.get(&current).map(Vec::as_slice).unwrap_or(&[]) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        // Report in definition order for determinism
        self.labels
            .keys()
            .filter(|id| seen.contains(id))
            .copied()
            .collect()
    }
}

/// Bind one extractor reference to a concrete label.
///
/// An explicit source group wins; otherwise a label in the dependent's own
/// group, then a label marked canonical for the name, then a unique
/// candidate anywhere.
fn resolve_reference(
    dependent: &Label,
    name: &str,
    source_group: Option<GroupId>,
    by_name: &HashMap<&str, Vec<&Label>>,
) -> ConfigResult<LabelId> {
    let candidates = by_name.get(name).map(Vec::as_slice).unwrap_or(&[]);
    if candidates.is_empty() {
        return Err(ConfigError::UnresolvedReference {
            label: dependent.name.clone(),
            reference: name.to_string(),
        });
    }

    let pick = |matches: Vec<&&Label>| -> Option<ConfigResult<LabelId>> {
        match matches.len() {
            0 => None,
            1 => Some(Ok(matches[0].id)),
            n => Some(Err(ConfigError::AmbiguousReference {
                label: dependent.name.clone(),
                reference: name.to_string(),
                candidates: n,
            })),
        }
    };

    if let Some(group) = source_group {
        let matches: Vec<_> = candidates.iter().filter(|l| l.group_id == group).collect();
        return pick(matches).unwrap_or(Err(ConfigError::UnresolvedReference {
            label: dependent.name.clone(),
            reference: name.to_string(),
        }));
    }

    let same_group: Vec<_> = candidates
        .iter()
        .filter(|l| l.group_id == dependent.group_id)
        .collect();
    if let Some(result) = pick(same_group) {
        return result;
    }

    let canonical: Vec<_> = candidates.iter().filter(|l| l.canonical).collect();
    if let Some(result) = pick(canonical) {
        return result;
    }

    pick(candidates.iter().collect()).unwrap()
}

/// Kahn's algorithm, seeded and tie-broken by label definition order so
/// the computation order is stable across passes.
fn topo_order(
    labels: &IndexMap<LabelId, Label>,
    deps: &HashMap<LabelId, Vec<LabelId>>,
    dependents: &HashMap<LabelId, Vec<LabelId>>,
) -> ConfigResult<Vec<LabelId>> {
    let position: HashMap<LabelId, usize> =
        labels.keys().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut in_degree: HashMap<LabelId, usize> = labels
        .keys()
        .map(|id| (*id, deps.get(id).map(Vec::len).unwrap_or(0)))
        .collect();

    let mut ready: Vec<LabelId> = labels
        .keys()
        .filter(|id| in_degree[id] == 0)
        .copied()
        .collect();
    ready.sort_by_key(|id| position[id]);
    let mut queue: VecDeque<LabelId> = ready.into();

    let mut order = Vec::with_capacity(labels.len());
    while let Some(id) = queue.pop_front() {
        order.push(id);
        let mut unblocked: Vec<LabelId> = Vec::new();
        for &dependent in dependents.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            let degree = in_degree.get_mut(&dependent).unwrap();
            *degree -= 1;
            if *degree == 0 {
                unblocked.push(dependent);
            }
        }
        unblocked.sort_by_key(|id| position[id]);
        queue.extend(unblocked);
    }

    if order.len() < labels.len() {
        let ordered: HashSet<LabelId> = order.iter().copied().collect();
        let stuck = labels
            .values()
            .find(|l| !ordered.contains(&l.id))
            .expect("at least one label is outside the partial order");
        return Err(ConfigError::CycleDetected {
            label: stuck.name.clone(),
        });
    }

    Ok(order)
}
