// src/lib.rs

pub mod alloc;
pub mod binding;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod stages;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::alloc::ForbiddenSet;
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::engine::{CompiledGraph, Evaluator, TimingHook};
use crate::graph::StageGraph;
use crate::stages::build_graph;

/// High-level entry point used by `main.rs`.
///
/// Loads the config, builds and compiles the graph, then runs ticks on a
/// fixed interval until `--ticks` is reached or Ctrl-C arrives.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let mut graph = build_graph(&cfg)?;

    let config = cfg.evaluator_config();
    let forbidden = Arc::new(ForbiddenSet::new(config.pool_id));
    let mut evaluator = Evaluator::new(config, forbidden);
    evaluator.add_hook(Box::new(TimingHook::new()));

    let compiled = evaluator.compile(&graph)?;
    if args.dry_run {
        print_plan(&graph, compiled);
        return Ok(());
    }

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ran: u64 = 0;
    loop {
        if args.ticks.is_some_and(|limit| ran >= limit) {
            break;
        }

        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                }
                info!("shutdown requested");
                break;
            }
            _ = interval.tick() => {
                let report = evaluator.evaluate(&mut graph)?;
                ran += 1;
                for failure in report.failures.iter() {
                    warn!(stage = %failure.stage, "{failure}");
                }
                info!(
                    tick = report.tick,
                    executed = report.executed.len(),
                    skipped = report.skipped.len(),
                    restored = report.restored.len(),
                    failed = report.failures.len(),
                    "tick complete"
                );
            }
        }
    }

    info!(ticks = ran, "stopped");
    Ok(())
}

/// Print order, levels and slot assignment of a compile.
fn print_plan(graph: &StageGraph, compiled: &CompiledGraph) {
    println!("framedag dry-run");
    println!();

    println!("order ({}):", compiled.order().len());
    for stage in compiled.order() {
        println!(
            "  [{}] {}",
            compiled.level_of(*stage),
            graph.label(*stage)
        );
    }

    let unscheduled: Vec<String> = graph
        .stage_ids()
        .filter(|id| !compiled.priorities().is_scheduled(*id))
        .map(|id| graph.label(id))
        .collect();
    if !unscheduled.is_empty() {
        println!("unscheduled: {}", unscheduled.join(", "));
    }

    println!("slots:");
    for record in compiled.slot_records() {
        println!(
            "  {} -> slot {} ({:?})",
            graph.port_label(record.producer),
            record.slot,
            record.retention
        );
    }
    println!("free: {:?}", compiled.free_slots());

    for rejected in compiled.rejected_connections() {
        println!("rejected: {rejected}");
    }

    debug!("dry-run complete (no ticks)");
}
