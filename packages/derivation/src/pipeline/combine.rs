//! Combination of per-extractor results into named bundles.
//!
//! One bundle becomes one output row of the label. Zip aligns results by
//! shared iteration key; NxN zips extractors sharing an iteration source
//! first, then cross-joins the distinct sources, with the earliest-defined
//! iterating extractor varying fastest.
//!
//! Extractors with colliding output names form a fallback chain: processed
//! in definition order, the last non-null value wins and nulls never
//! overwrite a present value.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde_json::Value;

use super::resolve::{IterationKey, IterationSource, ResolvedExtractor, ResolvedPair};
use crate::types::{CombinationMode, Label, LabelValueId};

/// One named-value bundle, tagged with the upstream rows it draws from.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Extractor output name to value, in definition order
    pub entries: IndexMap<String, Value>,
    /// Unwrapped single-extractor form: the label's value is the entry's
    /// value, not an object
    pub single: bool,
    /// True when this bundle represents one iteration branch
    pub is_iterated: bool,
    pub lineage: BTreeSet<LabelValueId>,
}

impl Bundle {
    /// The final JSON value this bundle produces when no reducer runs.
    pub fn into_value(mut self) -> Value {
        if self.single {
            self.entries
                .shift_remove_index(0)
                .map(|(_, v)| v)
                .unwrap_or(Value::Null)
        } else {
            Value::Object(self.entries.into_iter().collect())
        }
    }

    /// The bundle as a reducer argument: the bare value for single-
    /// extractor labels, an object keyed by extractor name otherwise.
    pub fn to_input(&self) -> Value {
        if self.single {
            self.entries
                .first()
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null)
        } else {
            Value::Object(self.entries.clone().into_iter().collect())
        }
    }
}

/// Combine resolved extractor results into bundles, one per output row.
pub fn combine(label: &Label, resolved: &[ResolvedExtractor]) -> Vec<Bundle> {
    match resolved.len() {
        0 => Vec::new(),
        1 => combine_single(&resolved[0]),
        _ => match label.combination {
            CombinationMode::Zip => combine_zip(resolved),
            CombinationMode::NxN => combine_nxn(resolved),
        },
    }
}

/// A single extractor's value is the label's value, unwrapped.
fn combine_single(extractor: &ResolvedExtractor) -> Vec<Bundle> {
    let iterating = extractor.is_iterating();
    extractor
        .pairs
        .iter()
        .map(|pair| {
            let mut entries = IndexMap::new();
            entries.insert(extractor.name.clone(), pair.value.clone());
            Bundle {
                entries,
                single: true,
                is_iterated: iterating,
                lineage: pair.lineage.iter().copied().collect(),
            }
        })
        .collect()
}

/// Last-non-null-wins insertion for fallback chains.
fn merge_entry(bundle: &mut Bundle, name: &str, pair: &ResolvedPair) {
    if pair.value.is_null() {
        if !bundle.entries.contains_key(name) {
            bundle.entries.insert(name.to_string(), Value::Null);
        }
    } else {
        bundle.entries.insert(name.to_string(), pair.value.clone());
    }
    bundle.lineage.extend(pair.lineage.iter().copied());
}

fn empty_bundle(is_iterated: bool) -> Bundle {
    Bundle {
        entries: IndexMap::new(),
        single: false,
        is_iterated,
        lineage: BTreeSet::new(),
    }
}

/// Index-aligned combination: one bundle per iteration key.
fn combine_zip(resolved: &[ResolvedExtractor]) -> Vec<Bundle> {
    let iterating: Vec<&ResolvedExtractor> =
        resolved.iter().filter(|e| e.is_iterating()).collect();

    if iterating.is_empty() {
        return combine_scalars(resolved);
    }

    // Keys in order of first appearance across extractors.
    let mut keys: Vec<&IterationKey> = Vec::new();
    for extractor in &iterating {
        for pair in &extractor.pairs {
            let key = pair.key.as_ref().expect("iterating pairs carry keys");
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    keys.into_iter()
        .map(|key| {
            let mut bundle = empty_bundle(true);
            for extractor in resolved {
                if extractor.is_iterating() {
                    // Missing keys leave the entry absent, not null-filled.
                    if let Some(pair) =
                        extractor.pairs.iter().find(|p| p.key.as_ref() == Some(key))
                    {
                        merge_entry(&mut bundle, &extractor.name, pair);
                    }
                } else if let Some(pair) = extractor.pairs.first() {
                    // A non-iterating extractor contributes its single
                    // value to every key.
                    merge_entry(&mut bundle, &extractor.name, pair);
                }
            }
            bundle
        })
        .filter(|b| !b.entries.is_empty())
        .collect()
}

/// All extractors non-iterating: at most one bundle.
fn combine_scalars(resolved: &[ResolvedExtractor]) -> Vec<Bundle> {
    let mut bundle = empty_bundle(false);
    for extractor in resolved {
        if let Some(pair) = extractor.pairs.first() {
            merge_entry(&mut bundle, &extractor.name, pair);
        }
    }
    if bundle.entries.is_empty() {
        Vec::new()
    } else {
        vec![bundle]
    }
}

/// One cross-join axis: extractors sharing an iteration source, zipped.
struct Axis<'a> {
    /// Slot per iteration key; each slot lists (extractor index, pair)
    slots: Vec<Vec<(usize, &'a ResolvedPair)>>,
}

/// Cartesian combination across distinct iteration sources.
///
/// The earliest-defined iterating extractor varies fastest: with axes A
/// (3 elements) then B (2), emission order is A0B0, A1B0, A2B0, A0B1,
/// A1B1, A2B1.
fn combine_nxn(resolved: &[ResolvedExtractor]) -> Vec<Bundle> {
    // Group iterating extractors by source, in order of first appearance.
    let mut sources: Vec<IterationSource> = Vec::new();
    for extractor in resolved {
        if extractor.is_iterating() && !sources.contains(&extractor.source) {
            sources.push(extractor.source);
        }
    }

    if sources.is_empty() {
        return combine_scalars(resolved);
    }

    let axes: Vec<Axis> = sources
        .iter()
        .map(|source| build_axis(resolved, *source))
        .collect();

    let total: usize = axes.iter().map(|a| a.slots.len()).product();
    let mut bundles = Vec::with_capacity(total);
    for i in 0..total {
        // Mixed-radix enumeration: axis 0 is the innermost loop.
        let mut remainder = i;
        let slot_indices: Vec<usize> = axes
            .iter()
            .map(|axis| {
                let idx = remainder % axis.slots.len();
                remainder /= axis.slots.len();
                idx
            })
            .collect();

        let mut bundle = empty_bundle(true);
        // Merge in extractor definition order so fallback chains behave
        // the same in every mode.
        for (extractor_idx, extractor) in resolved.iter().enumerate() {
            if extractor.is_iterating() {
                let axis_idx = sources.iter().position(|s| *s == extractor.source).unwrap();
                let slot = &axes[axis_idx].slots[slot_indices[axis_idx]];
                if let Some((_, pair)) = slot.iter().find(|(idx, _)| *idx == extractor_idx) {
                    merge_entry(&mut bundle, &extractor.name, pair);
                }
            } else if let Some(pair) = extractor.pairs.first() {
                merge_entry(&mut bundle, &extractor.name, pair);
            }
        }
        if !bundle.entries.is_empty() {
            bundles.push(bundle);
        }
    }
    bundles
}

/// Zip the extractors of one iteration source into key-aligned slots.
fn build_axis(resolved: &[ResolvedExtractor], source: IterationSource) -> Axis<'_> {
    let members: Vec<(usize, &ResolvedExtractor)> = resolved
        .iter()
        .enumerate()
        .filter(|(_, e)| e.source == source)
        .collect();

    let mut keys: Vec<&IterationKey> = Vec::new();
    for (_, extractor) in &members {
        for pair in &extractor.pairs {
            let key = pair.key.as_ref().expect("iterating pairs carry keys");
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    let slots = keys
        .into_iter()
        .map(|key| {
            members
                .iter()
                .filter_map(|(idx, extractor)| {
                    extractor
                        .pairs
                        .iter()
                        .find(|p| p.key.as_ref() == Some(key))
                        .map(|pair| (*idx, pair))
                })
                .collect()
        })
        .collect();

    Axis { slots }
}
