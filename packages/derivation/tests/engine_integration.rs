//! Integration tests for the full computation pipeline.
//!
//! These tests drive the engine end to end:
//! 1. Define labels over a run document
//! 2. Compute in dependency order
//! 3. Inspect the stored values and their lineage
//! 4. Assemble flattened rows

use serde_json::{json, Value};

use derivation::{
    CombinationMode, DependencyGraph, Engine, Extractor, GroupId, Label, LabelValueStore,
    MemoryStore, MockReducer, QuickJsReducer, Run, RowAssembler, ScalarMethod,
};

/// Helper to create a run with empty metadata.
fn run_with(group: GroupId, data: Value) -> Run {
    Run::new(group, data, json!({}))
}

fn engine() -> Engine<MemoryStore, MockReducer> {
    Engine::new(MemoryStore::new(), MockReducer::new())
}

fn js_engine() -> Engine<MemoryStore, QuickJsReducer> {
    Engine::new(MemoryStore::new(), QuickJsReducer::new())
}

#[tokio::test]
async fn single_path_label_round_trips_the_value() {
    let group = GroupId::new();
    let label = Label::new("score", group).with_extractor(Extractor::path("v", "$.score"));
    let run = run_with(group, json!({"score": 95}));

    let engine = engine();
    let report = engine.compute_labels(&[label.clone()], &run).await.unwrap();
    assert_eq!(report.total_rows(), 1);

    let values = engine.store().values_for(label.id, run.id).await.unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].value, json!(95));
    assert!(!values[0].is_iterated);
    assert!(values[0].lineage.is_empty());
}

#[tokio::test]
async fn foreach_label_produces_one_row_per_element() {
    let group = GroupId::new();
    let label =
        Label::new("latencies", group).with_extractor(Extractor::path("v", "$.samples").foreach());
    let run = run_with(group, json!({"samples": [12, 7, 31]}));

    let engine = engine();
    engine.compute_labels(&[label.clone()], &run).await.unwrap();

    let values = engine.store().values_for(label.id, run.id).await.unwrap();
    assert_eq!(values.len(), 3);
    assert!(values.iter().all(|v| v.is_iterated));
    let got: Vec<&Value> = values.iter().map(|v| &v.value).collect();
    assert_eq!(got, [&json!(12), &json!(7), &json!(31)]);
}

#[tokio::test]
async fn zip_aligns_two_iterations_by_position() {
    let group = GroupId::new();
    let label = Label::new("pairs", group)
        .with_extractor(Extractor::path("name", "$.names").foreach())
        .with_extractor(Extractor::path("ms", "$.timings").foreach());
    let run = run_with(
        group,
        json!({"names": ["warmup", "steady", "cooldown"], "timings": [120, 340, 95]}),
    );

    let engine = engine();
    engine.compute_labels(&[label.clone()], &run).await.unwrap();

    let values = engine.store().values_for(label.id, run.id).await.unwrap();
    assert_eq!(values.len(), 3);
    assert_eq!(values[0].value, json!({"name": "warmup", "ms": 120}));
    assert_eq!(values[2].value, json!({"name": "cooldown", "ms": 95}));
}

#[tokio::test]
async fn nxn_crosses_sources_with_the_first_extractor_varying_fastest() {
    let group = GroupId::new();
    let label = Label::new("matrix", group)
        .with_extractor(Extractor::path("a", "$.as").foreach())
        .with_extractor(Extractor::path("b", "$.bs").foreach())
        .with_combination(CombinationMode::NxN);
    let run = run_with(group, json!({"as": [1, 2], "bs": [10, 20, 30]}));

    let engine = engine();
    engine.compute_labels(&[label.clone()], &run).await.unwrap();

    let values = engine.store().values_for(label.id, run.id).await.unwrap();
    assert_eq!(values.len(), 6);
    let expected = [
        json!({"a": 1, "b": 10}),
        json!({"a": 2, "b": 10}),
        json!({"a": 1, "b": 20}),
        json!({"a": 2, "b": 20}),
        json!({"a": 1, "b": 30}),
        json!({"a": 2, "b": 30}),
    ];
    for (value, want) in values.iter().zip(expected) {
        assert_eq!(value.value, want);
    }
}

#[tokio::test]
async fn fallback_chain_prefers_the_last_non_null_source() {
    let group = GroupId::new();
    let label = Label::new("duration", group)
        .with_extractor(Extractor::path("v", "$.primary"))
        .with_extractor(Extractor::path("v", "$.backup"));

    let engine = engine();

    // Primary missing: the backup fills in.
    let run = run_with(group, json!({"primary": null, "backup": 5}));
    engine.compute_labels(&[label.clone()], &run).await.unwrap();
    let values = engine.store().values_for(label.id, run.id).await.unwrap();
    assert_eq!(values[0].value, json!({"v": 5}));

    // Both present: the later extractor wins.
    let run = run_with(group, json!({"primary": 1, "backup": 2}));
    engine.compute_labels(&[label.clone()], &run).await.unwrap();
    let values = engine.store().values_for(label.id, run.id).await.unwrap();
    assert_eq!(values[0].value, json!({"v": 2}));
}

#[tokio::test]
async fn label_ref_rows_carry_lineage_to_their_upstream_rows() {
    let group = GroupId::new();
    let a1_rows =
        Label::new("a1_rows", group).with_extractor(Extractor::path("v", "$.a1").foreach());
    let found_a = Label::new("foundA", group)
        .with_extractor(Extractor::label_ref("v", "a1_rows").with_path("$.key"));
    let run = run_with(group, json!({"a1": [{"key": "x"}, {"key": "y"}]}));

    let engine = engine();
    engine
        .compute_labels(&[a1_rows.clone(), found_a.clone()], &run)
        .await
        .unwrap();

    let upstream = engine.store().values_for(a1_rows.id, run.id).await.unwrap();
    let found = engine.store().values_for(found_a.id, run.id).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].value, json!("x"));
    assert_eq!(found[1].value, json!("y"));
    assert!(found.iter().all(|v| v.is_iterated));
    assert_eq!(found[0].lineage, vec![upstream[0].id]);
    assert_eq!(found[1].lineage, vec![upstream[1].id]);
}

#[tokio::test]
async fn quickjs_reducer_runs_once_per_bundle() {
    let group = GroupId::new();
    let label = Label::new("sum", group)
        .with_extractor(Extractor::path("a", "$.as").foreach())
        .with_extractor(Extractor::path("b", "$.bs").foreach())
        .with_reducer("(input) => input.a + input.b");
    let run = run_with(group, json!({"as": [1, 2], "bs": [10, 20]}));

    let engine = js_engine();
    engine.compute_labels(&[label.clone()], &run).await.unwrap();

    let values = engine.store().values_for(label.id, run.id).await.unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].value, json!(11));
    assert_eq!(values[1].value, json!(22));
    assert!(values.iter().all(|v| v.is_iterated));
}

#[tokio::test]
async fn quickjs_reducer_collapses_a_foreach_to_one_value() {
    let group = GroupId::new();
    let label = Label::new("joined", group)
        .with_extractor(Extractor::path("v", "$.tags").foreach())
        .with_reducer("(items) => items.join('-')");
    let run = run_with(group, json!({"tags": ["x", "y"]}));

    let engine = js_engine();
    engine.compute_labels(&[label.clone()], &run).await.unwrap();

    let values = engine.store().values_for(label.id, run.id).await.unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].value, json!("x-y"));
    assert!(!values[0].is_iterated);
}

#[tokio::test]
async fn scalar_method_governs_multi_valued_upstream_reducers() {
    let group = GroupId::new();
    let samples =
        Label::new("samples", group).with_extractor(Extractor::path("v", "$.ns").foreach());
    let total = Label::new("total", group)
        .with_extractor(Extractor::label_ref("v", "samples"))
        .with_reducer("(values) => values.reduce((a, b) => a + b, 0)")
        .with_scalar_method(ScalarMethod::All);
    let first = Label::new("first", group)
        .with_extractor(Extractor::label_ref("v", "samples"))
        .with_reducer("(value) => value * 10");
    let run = run_with(group, json!({"ns": [1, 2, 3]}));

    let engine = js_engine();
    engine
        .compute_labels(&[samples.clone(), total.clone(), first.clone()], &run)
        .await
        .unwrap();

    let totals = engine.store().values_for(total.id, run.id).await.unwrap();
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].value, json!(6));
    assert_eq!(totals[0].lineage.len(), 3);

    let firsts = engine.store().values_for(first.id, run.id).await.unwrap();
    assert_eq!(firsts.len(), 1);
    assert_eq!(firsts[0].value, json!(10));
}

#[tokio::test]
async fn failed_reducer_skips_rows_without_failing_the_run() {
    let group = GroupId::new();
    let label = Label::new("flaky", group)
        .with_extractor(Extractor::path("a", "$.as").foreach())
        .with_extractor(Extractor::path("b", "$.bs").foreach())
        .with_reducer("boom");
    let run = run_with(group, json!({"as": [1], "bs": [2]}));

    let reducer = MockReducer::new().with_failure("boom");
    let engine = Engine::new(MemoryStore::new(), reducer);
    let report = engine.compute_labels(&[label.clone()], &run).await.unwrap();

    assert_eq!(report.total_rows(), 0);
    let values = engine.store().values_for(label.id, run.id).await.unwrap();
    assert!(values.is_empty());
}

#[tokio::test]
async fn invalidate_marks_descendants_and_recompute_clears_them() {
    let group = GroupId::new();
    let base = Label::new("base", group).with_extractor(Extractor::path("v", "$.n"));
    let derived = Label::new("derived", group)
        .with_extractor(Extractor::label_ref("v", "base"))
        .with_reducer("(v) => v");
    let labels = vec![base.clone(), derived.clone()];
    let run = run_with(group, json!({"n": 4}));

    let engine = js_engine();
    engine.compute_labels(&labels, &run).await.unwrap();

    let affected = engine.invalidate(base.id, &labels, &[run.id]).await.unwrap();
    assert_eq!(affected.len(), 2);
    assert!(engine.store().is_dirty(base.id, run.id).await.unwrap());
    assert!(engine.store().is_dirty(derived.id, run.id).await.unwrap());

    let report = engine.recompute(&labels, std::slice::from_ref(&run)).await.unwrap();
    assert_eq!(report.succeeded, vec![run.id]);
    assert!(report.failed.is_empty());
    assert!(!engine.store().is_dirty(base.id, run.id).await.unwrap());
    assert!(!engine.store().is_dirty(derived.id, run.id).await.unwrap());
}

#[tokio::test]
async fn recomputation_yields_identical_values() {
    let group = GroupId::new();
    let label = Label::new("pairs", group)
        .with_extractor(Extractor::path("name", "$.names").foreach())
        .with_extractor(Extractor::path("ms", "$.timings").foreach());
    let run = run_with(group, json!({"names": ["a", "b"], "timings": [1, 2]}));

    let engine = engine();
    engine.compute_labels(&[label.clone()], &run).await.unwrap();
    let before: Vec<Value> = engine
        .store()
        .values_for(label.id, run.id)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.value)
        .collect();

    engine.compute_labels(&[label.clone()], &run).await.unwrap();
    let after: Vec<Value> = engine
        .store()
        .values_for(label.id, run.id)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.value)
        .collect();

    assert_eq!(before, after);
}

#[tokio::test]
async fn rows_for_group_flattens_a_nested_target_group() {
    let outer = GroupId::new();
    let inner = GroupId::new();
    let benchmark = Label::new("benchmark", outer)
        .with_extractor(Extractor::path("v", "$.benchmarks").foreach())
        .with_target_group(inner);
    let bname = Label::new("bname", inner).with_extractor(Extractor::path("v", "$.name"));
    let p99 = Label::new("p99", inner).with_extractor(Extractor::path("v", "$.timings.p99"));
    let labels = vec![benchmark.clone(), bname.clone(), p99.clone()];
    let run = run_with(
        outer,
        json!({"benchmarks": [
            {"name": "sort", "timings": {"p99": 250}},
            {"name": "scan", "timings": {"p99": 90}}
        ]}),
    );

    let engine = engine();
    engine.compute_labels(&labels, &run).await.unwrap();

    let graph = DependencyGraph::build(&labels).unwrap();
    let assembler = RowAssembler::new(&graph, engine.store());
    let rows = assembler.rows_for_group(inner, run.id, &[], &[]).await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name"), Some(&json!("sort")));
    assert_eq!(rows[0].get("bname"), Some(&json!("sort")));
    assert_eq!(rows[0].get("p99"), Some(&json!(250)));
    assert_eq!(rows[1].get("p99"), Some(&json!(90)));
}

#[tokio::test]
async fn rows_for_group_keeps_sibling_iteration_leaves_distinct() {
    let outer = GroupId::new();
    let inner = GroupId::new();
    // All leaves of the foreach share one upstream row, so their lineage
    // sets are identical; each must still be its own flattened row.
    let entries = Label::new("entries", outer).with_extractor(Extractor::path("v", "$.entries"));
    let entry = Label::new("entry", outer)
        .with_extractor(Extractor::label_ref("v", "entries").foreach())
        .with_target_group(inner);
    let ename = Label::new("ename", inner).with_extractor(Extractor::path("v", "$.name"));
    let labels = vec![entries.clone(), entry.clone(), ename.clone()];
    let run = run_with(
        outer,
        json!({"entries": [{"name": "first"}, {"name": "second"}]}),
    );

    let engine = engine();
    engine.compute_labels(&labels, &run).await.unwrap();

    let graph = DependencyGraph::build(&labels).unwrap();
    let assembler = RowAssembler::new(&graph, engine.store());
    let rows = assembler
        .rows_for_group(inner, run.id, &[], &["entries"])
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name"), Some(&json!("first")));
    assert_eq!(rows[0].get("ename"), Some(&json!("first")));
    assert_eq!(rows[1].get("name"), Some(&json!("second")));
    assert_eq!(rows[1].get("ename"), Some(&json!("second")));
}

#[tokio::test]
async fn rows_for_group_honors_include_and_exclude() {
    let outer = GroupId::new();
    let inner = GroupId::new();
    let benchmark = Label::new("benchmark", outer)
        .with_extractor(Extractor::path("v", "$.benchmarks").foreach())
        .with_target_group(inner);
    let p99 = Label::new("p99", inner).with_extractor(Extractor::path("v", "$.timings.p99"));
    let p50 = Label::new("p50", inner).with_extractor(Extractor::path("v", "$.timings.p50"));
    let labels = vec![benchmark.clone(), p99.clone(), p50.clone()];
    let run = run_with(
        outer,
        json!({"benchmarks": [{"name": "sort", "timings": {"p99": 250, "p50": 60}}]}),
    );

    let engine = engine();
    engine.compute_labels(&labels, &run).await.unwrap();
    let graph = DependencyGraph::build(&labels).unwrap();
    let assembler = RowAssembler::new(&graph, engine.store());

    let rows = assembler
        .rows_for_group(inner, run.id, &[], &["p50"])
        .await
        .unwrap();
    assert_eq!(rows[0].get("p99"), Some(&json!(250)));
    assert_eq!(rows[0].get("p50"), None);

    let rows = assembler
        .rows_for_group(inner, run.id, &["p50"], &[])
        .await
        .unwrap();
    assert_eq!(rows[0].get("p50"), Some(&json!(60)));
    assert_eq!(rows[0].get("p99"), None);
}

#[tokio::test]
async fn derived_values_walks_lineage_at_a_given_depth() {
    let group = GroupId::new();
    let a1_rows =
        Label::new("a1_rows", group).with_extractor(Extractor::path("v", "$.a1").foreach());
    let found_a = Label::new("foundA", group)
        .with_extractor(Extractor::label_ref("v", "a1_rows").with_path("$.key"));
    let labels = vec![a1_rows.clone(), found_a.clone()];
    let run = run_with(group, json!({"a1": [{"key": "x"}, {"key": "y"}]}));

    let engine = engine();
    engine.compute_labels(&labels, &run).await.unwrap();

    let graph = DependencyGraph::build(&labels).unwrap();
    let assembler = RowAssembler::new(&graph, engine.store());

    let upstream = engine.store().values_for(a1_rows.id, run.id).await.unwrap();
    let derived = assembler.derived_values(&upstream[0], 0).await.unwrap();
    assert_eq!(derived.len(), 1);
    assert_eq!(derived[0].value, json!("x"));

    // No second level of indirection exists.
    let deeper = assembler.derived_values(&upstream[0], 1).await.unwrap();
    assert!(deeper.is_empty());
}

#[tokio::test]
async fn concurrent_recompute_covers_every_run() {
    let group = GroupId::new();
    let label =
        Label::new("score", group).with_extractor(Extractor::path("v", "$.score"));
    let runs: Vec<Run> = (0..8)
        .map(|i| run_with(group, json!({"score": i})))
        .collect();

    let engine = engine();
    let report = engine
        .recompute_concurrent(std::slice::from_ref(&label), &runs, 4)
        .await
        .unwrap();

    assert_eq!(report.succeeded.len(), 8);
    assert!(report.failed.is_empty());
    for run in &runs {
        let values = engine.store().values_for(label.id, run.id).await.unwrap();
        assert_eq!(values.len(), 1);
    }
}
