// src/lib.rs

pub mod advisers;
pub mod ambiance;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod execution;
pub mod expressions;
pub mod interrupts;
pub mod logging;
pub mod plan;
pub mod steps;
pub mod store;
pub mod strategies;
pub mod tasks;
pub mod types;
pub mod waiter;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info, warn};

use crate::advisers::AdviserRegistry;
use crate::cli::CliArgs;
use crate::config::{PlanFile, load_and_validate};
use crate::engine::Orchestrator;
use crate::execution::Status;
use crate::interrupts::InterruptType;
use crate::steps::StepRegistry;
use crate::store::StateStore;
use crate::tasks::{ShellTaskExecutor, TaskExecutor};
use crate::waiter::{WaitNotifyEngine, spawn_consumers};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - plan file loading
/// - state store, wait/notify engine and its consumer pool
/// - shell task executor and built-in steps / advisers
/// - the orchestrator
/// - Ctrl-C handling (registers ABORT_ALL)
pub async fn run(args: CliArgs) -> Result<()> {
    let plan_path = PathBuf::from(&args.plan);
    let plan_file = load_and_validate(&plan_path)
        .with_context(|| format!("failed to load plan file {}", plan_path.display()))?;

    let mut setup = plan_file.setup.clone();
    setup.extend(args.setup.iter().cloned());

    if args.dry_run {
        print_dry_run(&plan_file, &setup);
        return Ok(());
    }

    let config = plan_file.config.clone();
    let store = StateStore::in_memory();
    let waiter = Arc::new(WaitNotifyEngine::new(store.clone(), config.clone()));
    let executor: Arc<dyn TaskExecutor> = Arc::new(ShellTaskExecutor::new(
        Arc::clone(&waiter),
        config.default_task_timeout(),
    ));

    let orchestrator = Orchestrator::new(
        &store,
        Arc::clone(&waiter),
        executor,
        Arc::new(StepRegistry::with_builtins()),
        AdviserRegistry::with_builtins(),
        config,
    )?;
    let consumers = spawn_consumers(Arc::clone(&waiter));

    let plan_execution_id = orchestrator
        .trigger_execution(plan_file.plan, setup)
        .await
        .context("failed to trigger plan execution")?;
    info!(%plan_execution_id, "plan execution started");

    // Ctrl-C → ABORT_ALL.
    {
        let orchestrator = Arc::clone(&orchestrator);
        let plan_execution_id = plan_execution_id.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
                return;
            }
            warn!(%plan_execution_id, "Ctrl-C received; aborting plan execution");
            if let Err(e) = orchestrator
                .register_interrupt(&plan_execution_id, InterruptType::AbortAll, None)
                .await
            {
                error!(error = %e, "failed to register abort interrupt");
            }
        });
    }

    let status = orchestrator.wait_for_plan(&plan_execution_id).await?;
    consumers.shutdown().await;

    print_summary(&orchestrator, &plan_execution_id)?;
    println!("{status}");

    if status != Status::Succeeded {
        bail!("plan execution {plan_execution_id} finished with status {status}");
    }
    Ok(())
}

/// One line per node execution, in creation order.
fn print_summary(orchestrator: &Orchestrator, plan_execution_id: &str) -> Result<()> {
    for node in orchestrator.node_executions(plan_execution_id)? {
        let retry = if node.old_retry { " (retried)" } else { "" };
        match &node.failure_info {
            Some(info) => println!(
                "{:<24} {:<20} {}{retry}",
                node.node.identifier, node.status, info.message
            ),
            None => println!("{:<24} {}{retry}", node.node.identifier, node.status),
        }
    }
    Ok(())
}

/// Simple dry-run output: print config, setup and nodes.
fn print_dry_run(plan_file: &PlanFile, setup: &BTreeMap<String, String>) {
    let config = &plan_file.config;
    println!("nodeflow dry-run");
    println!("  config.consumer_workers = {}", config.consumer_workers);
    println!("  config.max_update_attempts = {}", config.max_update_attempts);
    println!(
        "  config.default_task_timeout_secs = {}",
        config.default_task_timeout_secs
    );
    println!();

    if !setup.is_empty() {
        println!("setup:");
        for (key, value) in setup {
            println!("  {key} = {value}");
        }
        println!();
    }

    let plan = &plan_file.plan;
    println!("nodes ({}), start = {}:", plan.len(), plan.start_node_id());
    for node in plan.nodes() {
        println!("  - {} [{}] {}", node.id, node.group, node.step_type);
        if node.identifier != node.id {
            println!("      identifier: {}", node.identifier);
        }
        if let Some(next) = &node.next {
            println!("      next: {next}");
        }
        if !node.children.is_empty() {
            println!("      children: {:?}", node.children);
        }
        if !node.advisers.is_empty() {
            let types: Vec<&str> = node
                .advisers
                .iter()
                .map(|a| a.adviser_type.as_str())
                .collect();
            println!("      advisers: {types:?}");
        }
        if node.skip_expression_chain {
            println!("      skip_expression_chain: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
