//! Reducer invocation - producing final row values from bundles.
//!
//! Labels without a reducer pass bundles through unchanged. With a
//! reducer, the script receives one argument: the bare value for a single
//! non-iterating extractor, the full element array for a single iterating
//! one, or the bundle object for multi-extractor labels. A script that
//! throws, times out, or returns something unrepresentable skips that one
//! row; the rest of the label proceeds.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::warn;

use super::combine::Bundle;
use super::resolve::{IterationSource, ResolvedExtractor};
use crate::traits::ReducerEngine;
use crate::types::{EngineConfig, Label, LabelValueId, ScalarMethod};

/// One final output row of a label, before persistence.
#[derive(Debug, Clone)]
pub struct RowOutput {
    pub value: Value,
    pub is_iterated: bool,
    pub lineage: BTreeSet<LabelValueId>,
}

/// Apply the label's reducer (if any) to the combined bundles.
pub fn reduce<R: ReducerEngine>(
    label: &Label,
    resolved: &[ResolvedExtractor],
    bundles: Vec<Bundle>,
    engine: &R,
    config: &EngineConfig,
) -> Vec<RowOutput> {
    let Some(script) = &label.reducer else {
        return bundles
            .into_iter()
            .map(|bundle| RowOutput {
                is_iterated: bundle.is_iterated,
                lineage: bundle.lineage.clone(),
                value: bundle.into_value(),
            })
            .collect();
    };

    if resolved.len() == 1 {
        reduce_single(label, &resolved[0], bundles, script, engine, config)
    } else {
        // Multi-extractor: one invocation per bundle, with the object
        // keyed by extractor name.
        bundles
            .into_iter()
            .filter_map(|bundle| {
                let input = bundle.to_input();
                invoke(label, script, &input, engine, config).map(|value| RowOutput {
                    value,
                    is_iterated: bundle.is_iterated,
                    lineage: bundle.lineage,
                })
            })
            .collect()
    }
}

/// Reducer semantics for single-extractor labels.
fn reduce_single<R: ReducerEngine>(
    label: &Label,
    extractor: &ResolvedExtractor,
    bundles: Vec<Bundle>,
    script: &str,
    engine: &R,
    config: &EngineConfig,
) -> Vec<RowOutput> {
    match extractor.source {
        // A foreach iteration reduces to one value over the element array.
        IterationSource::Foreach { .. } => {
            let lineage: BTreeSet<LabelValueId> = bundles
                .iter()
                .flat_map(|b| b.lineage.iter().copied())
                .collect();
            let input = Value::Array(bundles.into_iter().map(Bundle::into_value).collect());
            invoke(label, script, &input, engine, config)
                .map(|value| RowOutput {
                    value,
                    is_iterated: false,
                    lineage,
                })
                .into_iter()
                .collect()
        }
        // A multi-valued upstream the label does not itself iterate:
        // governed by the scalar-selection mode.
        IterationSource::Upstream { .. } => match label.scalar_method {
            ScalarMethod::First => bundles
                .into_iter()
                .next()
                .and_then(|bundle| {
                    let input = bundle.to_input();
                    invoke(label, script, &input, engine, config).map(|value| RowOutput {
                        value,
                        is_iterated: false,
                        lineage: bundle.lineage,
                    })
                })
                .into_iter()
                .collect(),
            ScalarMethod::All => {
                let lineage: BTreeSet<LabelValueId> = bundles
                    .iter()
                    .flat_map(|b| b.lineage.iter().copied())
                    .collect();
                let input = Value::Array(bundles.into_iter().map(Bundle::into_value).collect());
                invoke(label, script, &input, engine, config)
                    .map(|value| RowOutput {
                        value,
                        is_iterated: false,
                        lineage,
                    })
                    .into_iter()
                    .collect()
            }
        },
        IterationSource::None => bundles
            .into_iter()
            .filter_map(|bundle| {
                let input = bundle.to_input();
                invoke(label, script, &input, engine, config).map(|value| RowOutput {
                    value,
                    is_iterated: false,
                    lineage: bundle.lineage,
                })
            })
            .collect(),
    }
}

/// Evaluate the script, logging failures; a failed row is skipped.
fn invoke<R: ReducerEngine>(
    label: &Label,
    script: &str,
    input: &Value,
    engine: &R,
    config: &EngineConfig,
) -> Option<Value> {
    match engine.evaluate(script, input, config.reducer_budget) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(label = %label.name, %error, "reducer failed; row skipped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EvalError, EvalResult};
    use crate::pipeline::resolve::{IterationKey, ResolvedPair};
    use crate::types::{Extractor, GroupId};
    use serde_json::json;
    use std::time::Duration;

    /// Sums numeric array inputs; the script "boom_on_a2" fails for
    /// bundles where `a == 2`.
    struct SumEngine;

    impl ReducerEngine for SumEngine {
        fn evaluate(&self, script: &str, input: &Value, _budget: Duration) -> EvalResult<Value> {
            if script == "boom_on_a2" && input.get("a") == Some(&json!(2)) {
                return Err(EvalError::Exception("boom".into()));
            }
            match input {
                Value::Array(items) => {
                    let sum: f64 = items.iter().filter_map(Value::as_f64).sum();
                    Ok(json!(sum))
                }
                other => Ok(other.clone()),
            }
        }
    }

    fn foreach_resolved(values: Vec<Value>) -> ResolvedExtractor {
        ResolvedExtractor {
            name: "v".into(),
            source: IterationSource::Foreach { extractor: 0 },
            pairs: values
                .into_iter()
                .enumerate()
                .map(|(i, value)| ResolvedPair {
                    value,
                    key: Some(IterationKey::Index(i)),
                    lineage: Vec::new(),
                })
                .collect(),
        }
    }

    fn bundles_for(resolved: &[ResolvedExtractor], label: &Label) -> Vec<Bundle> {
        crate::pipeline::combine::combine(label, resolved)
    }

    #[test]
    fn no_reducer_passes_bundles_through() {
        let label = Label::new("l", GroupId::new())
            .with_extractor(Extractor::path("v", "$.x").foreach());
        let resolved = [foreach_resolved(vec![json!(1), json!(2)])];
        let bundles = bundles_for(&resolved, &label);

        let rows = reduce(&label, &resolved, bundles, &SumEngine, &EngineConfig::default());
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.is_iterated));
        assert_eq!(rows[0].value, json!(1));
    }

    #[test]
    fn reducer_collapses_a_foreach_iteration_to_one_row() {
        let label = Label::new("l", GroupId::new())
            .with_extractor(Extractor::path("v", "$.x").foreach())
            .with_reducer("sum");
        let resolved = [foreach_resolved(vec![json!(1), json!(2), json!(3)])];
        let bundles = bundles_for(&resolved, &label);

        let rows = reduce(&label, &resolved, bundles, &SumEngine, &EngineConfig::default());
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_iterated);
        assert_eq!(rows[0].value, json!(6.0));
    }

    #[test]
    fn scalar_method_first_takes_the_first_upstream_row() {
        let upstream_label = crate::types::LabelId::new();
        let ids: Vec<LabelValueId> = (0..2).map(|_| LabelValueId::new()).collect();
        let resolved = [ResolvedExtractor {
            name: "v".into(),
            source: IterationSource::Upstream {
                label: upstream_label,
            },
            pairs: ids
                .iter()
                .enumerate()
                .map(|(i, id)| ResolvedPair {
                    value: json!(i * 10),
                    key: Some(IterationKey::Row(*id)),
                    lineage: vec![*id],
                })
                .collect(),
        }];
        let label = Label::new("l", GroupId::new())
            .with_extractor(Extractor::label_ref("v", "up"))
            .with_reducer("identity");
        let bundles = bundles_for(&resolved, &label);

        let rows = reduce(&label, &resolved, bundles, &SumEngine, &EngineConfig::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, json!(0));
        assert_eq!(rows[0].lineage.iter().copied().collect::<Vec<_>>(), vec![ids[0]]);
    }

    #[test]
    fn scalar_method_all_passes_the_full_list() {
        let upstream_label = crate::types::LabelId::new();
        let resolved = [ResolvedExtractor {
            name: "v".into(),
            source: IterationSource::Upstream {
                label: upstream_label,
            },
            pairs: (0..3)
                .map(|i| {
                    let id = LabelValueId::new();
                    ResolvedPair {
                        value: json!(i),
                        key: Some(IterationKey::Row(id)),
                        lineage: vec![id],
                    }
                })
                .collect(),
        }];
        let label = Label::new("l", GroupId::new())
            .with_extractor(Extractor::label_ref("v", "up"))
            .with_reducer("sum")
            .with_scalar_method(ScalarMethod::All);
        let bundles = bundles_for(&resolved, &label);

        let rows = reduce(&label, &resolved, bundles, &SumEngine, &EngineConfig::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, json!(3.0));
        assert_eq!(rows[0].lineage.len(), 3);
    }

    #[test]
    fn scalar_method_all_with_zero_rows_reduces_an_empty_list() {
        let resolved = [ResolvedExtractor {
            name: "v".into(),
            source: IterationSource::Upstream {
                label: crate::types::LabelId::new(),
            },
            pairs: Vec::new(),
        }];
        let label = Label::new("l", GroupId::new())
            .with_extractor(Extractor::label_ref("v", "up"))
            .with_reducer("sum")
            .with_scalar_method(ScalarMethod::All);

        let rows = reduce(&label, &resolved, Vec::new(), &SumEngine, &EngineConfig::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, json!(0.0));
    }

    #[test]
    fn failed_reducer_skips_only_that_row() {
        let label = Label::new("l", GroupId::new())
            .with_extractor(Extractor::path("a", "$.a").foreach())
            .with_extractor(Extractor::path("b", "$.b").foreach())
            .with_reducer("boom_on_a2");
        let resolved = [
            {
                let mut e = foreach_resolved(vec![json!(1), json!(2)]);
                e.name = "a".into();
                e
            },
            {
                let mut e = foreach_resolved(vec![json!(3), json!(4)]);
                e.name = "b".into();
                e.source = IterationSource::Foreach { extractor: 1 };
                e
            },
        ];
        let bundles = bundles_for(&resolved, &label);
        assert_eq!(bundles.len(), 2);

        // The a == 2 bundle fails; the other row survives.
        let rows = reduce(&label, &resolved, bundles, &SumEngine, &EngineConfig::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, json!({"a": 1, "b": 3}));
    }
}
