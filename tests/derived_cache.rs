use std::sync::Arc;

use framedag::alloc::ForbiddenSet;
use framedag::binding::{Binding, DerivedObject};
use framedag::cache::{
    CacheKey, CacheState, DerivedCache, DerivedStore, Fingerprint, MemoryDerivedStore,
    ResultCache,
};
use framedag::engine::{Evaluator, EvaluatorConfig};
use framedag::errors::CacheStateError;
use framedag::graph::{PayloadKind, StageGraph};
use framedag_test_utils::builders::{GraphBuilder, id};
use framedag_test_utils::init_tracing;
use framedag_test_utils::stages::{ExecutionLog, StateHandle, TestStage, executions};

struct Pipeline {
    graph: StageGraph,
    log: ExecutionLog,
    src_state: StateHandle,
}

/// Src (volume) -> Filter (volume) -> Render (not cacheable) -> Sink.
///
/// Render keeps Src and Filter out of the validity tier, so only the
/// derived-data tier decides whether they run.
fn pipeline() -> Pipeline {
    let src = TestStage::new("Src")
        .output("vol", PayloadKind::VolumeHandle)
        .cacheable()
        .state("iso=0.5");
    let src_state = src.state_handle();

    let (graph, log) = GraphBuilder::new()
        .stage(src)
        .stage(
            TestStage::new("Filter")
                .input("vol", PayloadKind::VolumeHandle)
                .output("vol", PayloadKind::VolumeHandle)
                .cacheable(),
        )
        .stage(
            TestStage::new("Render")
                .input("vol", PayloadKind::VolumeHandle)
                .output("out", PayloadKind::Image),
        )
        .stage(TestStage::new("Sink").input("in", PayloadKind::Image).sink())
        .connect("Src.vol", "Filter.vol")
        .connect("Filter.vol", "Render.vol")
        .connect("Render.out", "Sink.in")
        .build();

    Pipeline {
        graph,
        log,
        src_state,
    }
}

fn evaluator() -> Evaluator {
    Evaluator::new(EvaluatorConfig::with_pool_size(4), Arc::new(ForbiddenSet::new(0)))
}

fn volume_digest(evaluator: &Evaluator, graph: &StageGraph, stage: &str) -> Option<String> {
    match evaluator
        .compiled()
        .unwrap()
        .binding(graph, id(graph, stage), "vol", 0)
        .unwrap()
    {
        Binding::Volume(cell) => cell.get().map(|obj| obj.digest().to_string()),
        other => panic!("unexpected binding {other:?}"),
    }
}

#[test]
fn producers_stay_out_of_the_validity_tier() {
    let Pipeline { graph, .. } = pipeline();
    let plan = ResultCache::plan(&graph);
    assert_eq!(plan.qualifying().count(), 0);
}

#[test]
fn unchanged_fingerprint_skips_execution() {
    init_tracing();
    let Pipeline { mut graph, log, .. } = pipeline();
    let mut evaluator = evaluator();
    evaluator.compile(&graph).unwrap();

    let first = evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(first.executed.len(), 4);
    assert_eq!(evaluator.derived_cache().store().len(), 2);

    let second = evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(second.skipped, vec![id(&graph, "Src"), id(&graph, "Filter")]);
    assert_eq!(executions(&log, "Src"), 1);
    assert_eq!(executions(&log, "Filter"), 1);
    assert_eq!(executions(&log, "Render"), 2);
}

#[test]
fn state_change_reruns_the_stage_and_its_consumers() {
    let Pipeline {
        mut graph,
        log,
        src_state,
    } = pipeline();
    let mut evaluator = evaluator();
    evaluator.compile(&graph).unwrap();
    evaluator.evaluate(&mut graph).unwrap();
    let before = volume_digest(&evaluator, &graph, "Filter");

    src_state.set("iso=0.7");
    let report = evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(executions(&log, "Src"), 2);
    // Filter's input description carries Src's new content digest.
    assert_eq!(executions(&log, "Filter"), 2);
    assert!(report.restored.is_empty());
    assert_ne!(volume_digest(&evaluator, &graph, "Filter"), before);
}

#[test]
fn reverting_state_restores_from_the_store() {
    let Pipeline {
        mut graph,
        log,
        src_state,
    } = pipeline();
    let mut evaluator = evaluator();
    evaluator.compile(&graph).unwrap();
    evaluator.evaluate(&mut graph).unwrap();
    let original_src = volume_digest(&evaluator, &graph, "Src");
    let original_filter = volume_digest(&evaluator, &graph, "Filter");

    src_state.set("iso=0.7");
    evaluator.evaluate(&mut graph).unwrap();

    src_state.set("iso=0.5");
    let report = evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(report.restored, vec![id(&graph, "Src"), id(&graph, "Filter")]);
    assert_eq!(executions(&log, "Src"), 2);
    assert_eq!(executions(&log, "Filter"), 2);
    assert_eq!(volume_digest(&evaluator, &graph, "Src"), original_src);
    assert_eq!(volume_digest(&evaluator, &graph, "Filter"), original_filter);

    let record = evaluator.derived_cache().record("Src").unwrap();
    assert!(record.starts_with("iso=0.5,inports="));
}

#[test]
fn recompile_restores_instead_of_recomputing() {
    let Pipeline { mut graph, log, .. } = pipeline();
    let mut evaluator = evaluator();
    evaluator.compile(&graph).unwrap();
    evaluator.evaluate(&mut graph).unwrap();

    evaluator.compile(&graph).unwrap();
    assert_eq!(evaluator.derived_cache().record("Src").as_deref(), Some(""));
    let report = evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(report.restored, vec![id(&graph, "Src"), id(&graph, "Filter")]);
    assert_eq!(executions(&log, "Src"), 1);
}

#[test]
fn disabled_tier_always_executes() {
    let Pipeline { mut graph, log, .. } = pipeline();
    let mut evaluator = evaluator();
    evaluator.set_derived_caching(false);
    evaluator.compile(&graph).unwrap();

    evaluator.evaluate(&mut graph).unwrap();
    evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(executions(&log, "Src"), 2);

    evaluator.set_derived_caching(true);
    evaluator.evaluate(&mut graph).unwrap();
    evaluator.evaluate(&mut graph).unwrap();
    // Records were never written while disabled, so one more run first.
    assert_eq!(executions(&log, "Src"), 3);
}

#[test]
fn empty_store_never_restores() {
    let Pipeline {
        mut graph,
        log,
        src_state,
    } = pipeline();
    let mut evaluator = evaluator().with_derived_store(Box::new(MemoryDerivedStore::new(0)));
    evaluator.compile(&graph).unwrap();
    evaluator.evaluate(&mut graph).unwrap();

    src_state.set("iso=0.7");
    evaluator.evaluate(&mut graph).unwrap();
    src_state.set("iso=0.5");
    let report = evaluator.evaluate(&mut graph).unwrap();
    assert!(report.restored.is_empty());
    assert_eq!(executions(&log, "Src"), 3);
}

#[test]
fn incompatible_and_missing_records_are_reported() {
    let Pipeline { graph, .. } = pipeline();
    let mut evaluator = evaluator();
    evaluator.compile(&graph).unwrap();
    let bindings = evaluator.compiled().unwrap().bindings();

    assert_eq!(
        evaluator
            .derived_cache()
            .cache_state(&graph, bindings, id(&graph, "Render")),
        Err(CacheStateError::Incompatible("Render".to_string()))
    );

    let unseeded = DerivedCache::new(true, 4);
    assert_eq!(
        unseeded.cache_state(&graph, bindings, id(&graph, "Src")),
        Err(CacheStateError::ProcessorMissing("Src".to_string()))
    );

    // Seeded records never match a live fingerprint.
    assert!(matches!(
        evaluator
            .derived_cache()
            .cache_state(&graph, bindings, id(&graph, "Src")),
        Ok(CacheState::Stale(Fingerprint { state, .. })) if state == "iso=0.5"
    ));
}

#[test]
fn store_evicts_least_read_entries_first() {
    let key = |n: &str| CacheKey::new("Src", "vol", "", n);
    let mut store = MemoryDerivedStore::new(2);
    assert_eq!(store.capacity(), 2);

    store.insert(key("a"), DerivedObject::new("a", 1u32));
    store.insert(key("b"), DerivedObject::new("b", 2u32));
    assert!(store.find(&key("a")).is_some());
    assert_eq!(store.reads(&key("a")), Some(1));

    store.insert(key("c"), DerivedObject::new("c", 3u32));
    assert_eq!(store.len(), 2);
    assert!(store.contains(&key("a")));
    assert!(!store.contains(&key("b")));
    assert!(store.contains(&key("c")));

    let hit = store.find(&key("c")).unwrap();
    assert_eq!(hit.downcast_ref::<u32>(), Some(&3));

    store.clear();
    assert!(store.is_empty());
}

#[test]
fn cache_keys_cover_every_component() {
    let base = CacheKey::new("Src", "vol", "in=volume:x", "iso=0.5");
    assert_eq!(base, CacheKey::new("Src", "vol", "in=volume:x", "iso=0.5"));
    assert_ne!(base, CacheKey::new("Src2", "vol", "in=volume:x", "iso=0.5"));
    assert_ne!(base, CacheKey::new("Src", "vol2", "in=volume:x", "iso=0.5"));
    assert_ne!(base, CacheKey::new("Src", "vol", "in=volume:y", "iso=0.5"));
    assert_ne!(base, CacheKey::new("Src", "vol", "in=volume:x", "iso=0.6"));
    assert_eq!(
        base.label(),
        "StageSrc.Outportvol.InportConfigin=volume:x.Stateiso=0.5"
    );
}

#[test]
fn dotted_names_do_not_share_a_key() {
    let left = CacheKey::new("a.b", "c", "", "");
    let right = CacheKey::new("a", "b.c", "", "");
    assert_eq!(left.label(), right.label());
    assert_ne!(left.digest(), right.digest());
    assert_ne!(left, right);

    let mut store = MemoryDerivedStore::new(4);
    store.insert(left.clone(), DerivedObject::new("left", 1u32));
    assert!(store.contains(&left));
    assert!(!store.contains(&right));
}
