//! Extraction resolution - evaluating one extractor against its source.
//!
//! Each extractor resolves to an ordered list of (value, iteration key)
//! pairs. A non-iterating extraction yields at most one pair with no key;
//! a foreach extraction yields one pair per array element; a reference to
//! an iterated upstream label yields one pair per upstream row, keyed by
//! that row's identity so sibling extractors over the same upstream zip
//! correctly.
//!
//! Absent paths, explicit nulls, and foreach over non-arrays are "no
//! value", not errors: heterogeneous run documents routinely miss fields.

use std::collections::HashMap;

use serde_json::Value;
use serde_json_path::JsonPath;
use tracing::{debug, warn};

use crate::graph::DependencyGraph;
use crate::types::{
    Extractor, ExtractorSource, Label, LabelId, LabelValue, LabelValueId, Run,
};

/// Identity of one iteration branch element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IterationKey {
    /// Element of a top-level foreach expansion
    Index(usize),
    /// One row of an iterated upstream label
    Row(LabelValueId),
    /// Element of a foreach expansion scoped to an upstream row
    RowIndex(LabelValueId, usize),
}

/// The iteration an extractor's pairs belong to, if any.
///
/// Distinct sources are the cross-join axes of NxN combination;
/// extractors sharing a source zip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterationSource {
    /// Not iterating: at most one pair
    None,
    /// A foreach expansion started by this extractor
    Foreach { extractor: usize },
    /// Rows of an iterated upstream label
    Upstream { label: LabelId },
}

/// One resolved (value, key) pair with its upstream lineage.
#[derive(Debug, Clone)]
pub struct ResolvedPair {
    pub value: Value,
    pub key: Option<IterationKey>,
    pub lineage: Vec<LabelValueId>,
}

/// The full resolution of one extractor for one run.
#[derive(Debug, Clone)]
pub struct ResolvedExtractor {
    pub name: String,
    pub source: IterationSource,
    pub pairs: Vec<ResolvedPair>,
}

impl ResolvedExtractor {
    /// Whether this extractor expands into iteration branches.
    pub fn is_iterating(&self) -> bool {
        !matches!(self.source, IterationSource::None)
    }
}

/// Label values already computed for the run being processed.
///
/// The engine fills this in topological order; extractors of later labels
/// read earlier labels' rows from it.
#[derive(Debug, Default)]
pub struct ComputedValues {
    by_label: HashMap<LabelId, Vec<LabelValue>>,
}

impl ComputedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label_id: LabelId, values: Vec<LabelValue>) {
        self.by_label.insert(label_id, values);
    }

    pub fn get(&self, label_id: LabelId) -> &[LabelValue] {
        self.by_label
            .get(&label_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Resolve all extractors of one label against a run.
pub fn resolve_extractors(
    label: &Label,
    run: &Run,
    computed: &ComputedValues,
    graph: &DependencyGraph,
) -> Vec<ResolvedExtractor> {
    let context = context_rows(label, graph, computed);
    label
        .extractors
        .iter()
        .enumerate()
        .map(|(idx, extractor)| resolve_one(label, idx, extractor, run, computed, graph, &context))
        .collect()
}

/// Rows of the label establishing this label's target-group context.
///
/// When the owning label's group is another label's target group, raw and
/// metadata paths evaluate against that label's row values instead of the
/// whole document.
fn context_rows<'a>(
    label: &Label,
    graph: &DependencyGraph,
    computed: &'a ComputedValues,
) -> Option<(LabelId, &'a [LabelValue])> {
    let bases: Vec<_> = graph
        .labels_targeting(label.group_id)
        .into_iter()
        .filter(|base| base.id != label.id)
        .collect();
    let base = bases.first()?;
    if bases.len() > 1 {
        warn!(
            label = %label.name,
            "multiple labels target this label's group; scoping paths to '{}'",
            base.name
        );
    }
    Some((base.id, computed.get(base.id)))
}

fn resolve_one(
    label: &Label,
    idx: usize,
    extractor: &Extractor,
    run: &Run,
    computed: &ComputedValues,
    graph: &DependencyGraph,
    context: &Option<(LabelId, &[LabelValue])>,
) -> ResolvedExtractor {
    match &extractor.source {
        ExtractorSource::RawPath { path } => {
            resolve_document(label, idx, extractor, path, &run.data, context)
        }
        ExtractorSource::MetadataPath { path } => {
            resolve_document(label, idx, extractor, path, &run.metadata, context)
        }
        ExtractorSource::LabelRef { path, .. } => {
            let Some(upstream) = graph.binding(label.id, idx) else {
                // The graph binds every reference before computation; a
                // missing binding means the label set changed underneath us.
                warn!(label = %label.name, extractor = %extractor.name, "unbound label reference");
                return ResolvedExtractor {
                    name: extractor.name.clone(),
                    source: IterationSource::None,
                    pairs: Vec::new(),
                };
            };
            resolve_label_ref(label, idx, extractor, upstream, path.as_deref(), computed)
        }
    }
}

/// Resolve a raw-document or metadata path, honoring target-group scoping.
fn resolve_document(
    label: &Label,
    idx: usize,
    extractor: &Extractor,
    path: &str,
    document: &Value,
    context: &Option<(LabelId, &[LabelValue])>,
) -> ResolvedExtractor {
    let Some(parsed) = parse_path(label, extractor, path) else {
        return empty(extractor);
    };

    match context {
        Some((base_label, base_rows)) if !base_rows.is_empty() => {
            // Scoped: evaluate against each ancestor element.
            let mut pairs = Vec::new();
            for row in *base_rows {
                if extractor.foreach {
                    for (i, element) in expect_array(label, extractor, query(&parsed, &row.value))
                        .into_iter()
                        .enumerate()
                    {
                        pairs.push(ResolvedPair {
                            value: element,
                            key: Some(IterationKey::RowIndex(row.id, i)),
                            lineage: vec![row.id],
                        });
                    }
                } else if let Some(value) = query(&parsed, &row.value) {
                    pairs.push(ResolvedPair {
                        value,
                        key: Some(IterationKey::Row(row.id)),
                        lineage: vec![row.id],
                    });
                }
            }
            let source = if extractor.foreach {
                IterationSource::Foreach { extractor: idx }
            } else {
                IterationSource::Upstream { label: *base_label }
            };
            ResolvedExtractor {
                name: extractor.name.clone(),
                source,
                pairs,
            }
        }
        _ => {
            // Top level: evaluate against the whole document.
            if extractor.foreach {
                let pairs = expect_array(label, extractor, query(&parsed, document))
                    .into_iter()
                    .enumerate()
                    .map(|(i, element)| ResolvedPair {
                        value: element,
                        key: Some(IterationKey::Index(i)),
                        lineage: Vec::new(),
                    })
                    .collect();
                ResolvedExtractor {
                    name: extractor.name.clone(),
                    source: IterationSource::Foreach { extractor: idx },
                    pairs,
                }
            } else {
                let pairs = query(&parsed, document)
                    .map(|value| ResolvedPair {
                        value,
                        key: None,
                        lineage: Vec::new(),
                    })
                    .into_iter()
                    .collect();
                ResolvedExtractor {
                    name: extractor.name.clone(),
                    source: IterationSource::None,
                    pairs,
                }
            }
        }
    }
}

/// Resolve a reference to an upstream label's computed rows.
fn resolve_label_ref(
    label: &Label,
    idx: usize,
    extractor: &Extractor,
    upstream: LabelId,
    suffix: Option<&str>,
    computed: &ComputedValues,
) -> ResolvedExtractor {
    let rows = computed.get(upstream);
    let suffix = suffix.and_then(|s| parse_path(label, extractor, s));
    let apply = |value: &Value| -> Option<Value> {
        match &suffix {
            Some(path) => query(path, value),
            None if value.is_null() => None,
            None => Some(value.clone()),
        }
    };

    if extractor.foreach {
        // Each upstream value is exactly one array; expand it into a new
        // iteration keyed by element index within that row.
        let mut pairs = Vec::new();
        for row in rows {
            let resolved = apply(&row.value);
            for (i, element) in expect_array(label, extractor, resolved)
                .into_iter()
                .enumerate()
            {
                pairs.push(ResolvedPair {
                    value: element,
                    key: Some(IterationKey::RowIndex(row.id, i)),
                    lineage: vec![row.id],
                });
            }
        }
        return ResolvedExtractor {
            name: extractor.name.clone(),
            source: IterationSource::Foreach { extractor: idx },
            pairs,
        };
    }

    let iterated = rows.len() > 1 || rows.first().is_some_and(|r| r.is_iterated) || rows.is_empty();
    if iterated {
        let pairs = rows
            .iter()
            .filter_map(|row| {
                apply(&row.value).map(|value| ResolvedPair {
                    value,
                    key: Some(IterationKey::Row(row.id)),
                    lineage: vec![row.id],
                })
            })
            .collect();
        ResolvedExtractor {
            name: extractor.name.clone(),
            source: IterationSource::Upstream { label: upstream },
            pairs,
        }
    } else {
        let row = &rows[0];
        let pairs = apply(&row.value)
            .map(|value| ResolvedPair {
                value,
                key: None,
                lineage: vec![row.id],
            })
            .into_iter()
            .collect();
        ResolvedExtractor {
            name: extractor.name.clone(),
            source: IterationSource::None,
            pairs,
        }
    }
}

fn empty(extractor: &Extractor) -> ResolvedExtractor {
    ResolvedExtractor {
        name: extractor.name.clone(),
        source: IterationSource::None,
        pairs: Vec::new(),
    }
}

/// Parse a JSONPath, logging invalid expressions as "no value".
fn parse_path(label: &Label, extractor: &Extractor, path: &str) -> Option<JsonPath> {
    match JsonPath::parse(path) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            warn!(
                label = %label.name,
                extractor = %extractor.name,
                path = %path,
                %error,
                "invalid JSONPath; extractor yields no value"
            );
            None
        }
    }
}

/// Evaluate a parsed path; absent matches and explicit nulls are no value,
/// multiple matches collapse into an array.
fn query(path: &JsonPath, document: &Value) -> Option<Value> {
    let nodes = path.query(document).all();
    let value = match nodes.len() {
        0 => return None,
        1 => nodes[0].clone(),
        _ => Value::Array(nodes.into_iter().cloned().collect()),
    };
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

/// Unwrap a foreach target into its elements; non-arrays yield nothing.
fn expect_array(label: &Label, extractor: &Extractor, value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(elements)) => elements,
        Some(other) => {
            debug!(
                label = %label.name,
                extractor = %extractor.name,
                found = %json_kind(&other),
                "foreach target is not an array; extractor yields no value"
            );
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
