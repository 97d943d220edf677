//! Command handlers.

use crate::commands::TriggerArgs;
use crate::config::CliConfig;
use console::style;
use gantry_cache::{CacheManager, FilesystemStore};
use gantry_core::events::Event;
use gantry_core::loader;
use gantry_core::ports::{LogStream, SecretVault};
use gantry_core::run::{JobReport, JobStatus, RunReport, RunStatus, StepStatus, TriggerEvent};
use gantry_core::workflow::{EventKind, WorkflowDefinition};
use gantry_runner::{BroadcastEventBus, ExecutorConfig, FsWorkspace, JobExecutor, ShellConfig, ShellRuntime};
use gantry_scheduler::{Catalog, EngineConfig, JobGraph, JobWork, Orchestrator, RunPlan, TriggerMatcher};
use gantry_secrets::{ChainVault, EnvVault, FileVault, SecretScopeManager};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Validate a workflow definition.
pub fn validate(path: &Path) -> CliResult {
    let definition = loader::load_file(path)?;
    let order = loader::job_order(&definition)?;

    println!(
        "{} Workflow \"{}\" is valid",
        style("✓").green(),
        definition.name
    );
    println!("  Jobs: {}", definition.jobs.len());
    for name in order {
        if let Some(job) = definition.job(&name) {
            let shape = match job.reusable_ref() {
                Some(_) => "reusable".to_string(),
                None => format!("{} steps", job.steps.len()),
            };
            println!("    - {} ({})", name, shape);
        }
    }
    Ok(())
}

/// Print the concrete job DAG for a trigger.
pub fn plan(config: &CliConfig, path: &Path, trigger: &TriggerArgs, json: bool) -> CliResult {
    let definition = loader::load_file(path)?;
    let event = trigger_event(trigger)?;
    let catalog = load_catalog(config)?;
    let plan = gantry_scheduler::Planner::new(&catalog, EngineConfig::default().planner_config())
        .plan(&definition, &event)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan, 0)?;
    }
    Ok(())
}

/// Run a workflow locally with the shell runtime.
pub async fn run(
    config: &CliConfig,
    path: &Path,
    trigger: &TriggerArgs,
    parallelism: Option<usize>,
    engine_config: Option<&Path>,
) -> CliResult {
    let definition = loader::load_file(path)?;
    let event = trigger_event(trigger)?;

    let mut engine = match engine_config {
        Some(path) => EngineConfig::load(path)?,
        None => {
            let mut engine = EngineConfig::default();
            engine.apply_env_overrides();
            engine
        }
    };
    if let Some(parallelism) = parallelism {
        engine.parallelism = parallelism.max(1);
    }
    debug!(
        parallelism = engine.parallelism,
        compression = ?engine.cache_compression,
        "Engine configured"
    );

    let workdir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or(std::env::current_dir()?);

    let events = Arc::new(BroadcastEventBus::default());
    let printer = tokio::spawn(print_events(events.subscribe()));

    let executor = JobExecutor::new(
        Arc::new(ShellRuntime::new(ShellConfig {
            timeout: engine.step_timeout(),
            ..ShellConfig::default()
        })),
        Arc::new(SecretScopeManager::new(build_vault(config).await?)),
        Arc::new(CacheManager::with_compression(
            Arc::new(FilesystemStore::new(config.resolved_cache_dir()?)),
            engine.cache_compression,
        )),
        Arc::new(FsWorkspace::new(&workdir)),
    )
    .with_events(events.clone())
    .with_config(ExecutorConfig {
        step_timeout: engine.step_timeout(),
        workdir: Some(workdir),
    });

    println!(
        "{} Running {} on {} ({})",
        style("▶").cyan(),
        style(&definition.name).bold(),
        style(event.short_ref()).dim(),
        event.effective_kind()
    );

    let orchestrator = Orchestrator::new(Arc::new(load_catalog(config)?), Arc::new(executor), engine);
    let report = orchestrator.start_run(&definition, &event).await;

    drop(orchestrator);
    drop(events);
    let _ = printer.await;

    let report = report?;
    print_report(&report, 0);
    match report.status {
        RunStatus::Succeeded => Ok(()),
        status => Err(format!("run finished with status {:?}", status).into()),
    }
}

/// List definitions in `dir` that the trigger activates.
pub fn match_definitions(dir: &Path, trigger: &TriggerArgs) -> CliResult {
    let event = trigger_event(trigger)?;
    let definitions = discover(dir)?;
    let matched = matching(&definitions, &event, Utc::now());

    if matched.is_empty() {
        println!("{} No definitions match", style("i").blue());
        return Ok(());
    }
    for m in matched {
        println!(
            "{} {} {}",
            style("✓").green(),
            style(&m.definition.name).bold(),
            style(m.path.display()).dim()
        );
        if let Some(next) = m.next_scheduled {
            println!("    next scheduled run: {}", next.to_rfc3339());
        }
    }
    Ok(())
}

/// A definition the trigger activates.
pub struct Matched<'a> {
    pub path: &'a Path,
    pub definition: &'a WorkflowDefinition,
    /// Next firing of the definition's schedule triggers after `now`.
    pub next_scheduled: Option<DateTime<Utc>>,
}

pub fn matching<'a>(
    definitions: &'a [(PathBuf, WorkflowDefinition)],
    event: &TriggerEvent,
    now: DateTime<Utc>,
) -> Vec<Matched<'a>> {
    let matcher = TriggerMatcher::new();
    definitions
        .iter()
        .filter(|(_, d)| matcher.matches(d, event))
        .map(|(path, definition)| Matched {
            path,
            definition,
            next_scheduled: matcher.next_scheduled(definition, now),
        })
        .collect()
}

/// Print the JSON schema of workflow definitions.
pub fn schema() -> CliResult {
    let schema = schemars::schema_for!(WorkflowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// List cache entries.
pub async fn list_cache(config: &CliConfig, prefix: Option<&str>) -> CliResult {
    let cache = local_cache(config)?;
    let entries = cache.list(prefix).await?;
    if entries.is_empty() {
        println!("{} Cache is empty", style("i").blue());
        return Ok(());
    }
    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    for entry in &entries {
        println!("  {:>10}  {}", entry.size_bytes, entry.key);
    }
    println!("{} entries, {} bytes", entries.len(), total);
    Ok(())
}

/// Clear cache entries.
pub async fn clear_cache(config: &CliConfig, prefix: Option<&str>) -> CliResult {
    let removed = local_cache(config)?.clear(prefix).await?;
    println!("{} Removed {} cache entries", style("✓").green(), removed);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> CliResult {
    println!("{}", style("Gantry CLI Configuration").bold());
    println!();
    println!("  Config file: {}", CliConfig::config_path()?.display());
    println!("  Cache dir: {}", config.resolved_cache_dir()?.display());
    println!("  Catalog dir: {}", display_opt(config.catalog_dir.as_deref()));
    println!("  Secrets file: {}", display_opt(config.secrets_file.as_deref()));
    println!(
        "  Env prefix: {}",
        config.env_prefix.as_deref().unwrap_or("(none)")
    );
    println!("  Log format: {:?}", config.log_format);
    Ok(())
}

/// Set a configuration value.
pub fn set_config(key: &str, value: &str) -> CliResult {
    let mut config = CliConfig::load()?;
    config.set(key, value)?;
    config.save()?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

pub fn trigger_event(args: &TriggerArgs) -> CliResult<TriggerEvent> {
    let kind: EventKind = serde_yaml::from_str(&args.event)
        .map_err(|_| format!("Unknown event kind: {}", args.event))?;
    let mut event = TriggerEvent::new(kind, &args.git_ref);
    event.is_tag |= args.tag || args.git_ref.starts_with("refs/tags/");
    Ok(event)
}

/// Load every definition in `dir`, sorted by path.
pub fn discover(dir: &Path) -> CliResult<Vec<(PathBuf, WorkflowDefinition)>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml" | "json")
            )
        })
        .collect();
    paths.sort();

    let mut definitions = Vec::with_capacity(paths.len());
    for path in paths {
        match loader::load_file(&path) {
            Ok(definition) => definitions.push((path, definition)),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping invalid definition"),
        }
    }
    Ok(definitions)
}

fn load_catalog(config: &CliConfig) -> CliResult<Catalog> {
    match &config.catalog_dir {
        Some(dir) if dir.is_dir() => {
            let catalog = Catalog::load_dir(dir)?;
            info!(dir = %dir.display(), "Loaded catalog");
            Ok(catalog)
        }
        _ => Ok(Catalog::new()),
    }
}

fn local_cache(config: &CliConfig) -> CliResult<CacheManager> {
    Ok(CacheManager::new(Arc::new(FilesystemStore::new(
        config.resolved_cache_dir()?,
    ))))
}

async fn build_vault(config: &CliConfig) -> CliResult<Arc<dyn SecretVault>> {
    let mut vaults: Vec<Arc<dyn SecretVault>> = Vec::new();
    if let Some(path) = &config.secrets_file {
        vaults.push(Arc::new(FileVault::load_from_file(path).await?));
    }
    vaults.push(Arc::new(EnvVault::new(config.env_prefix.clone())));
    Ok(Arc::new(ChainVault::new(vaults)))
}

fn print_plan(plan: &RunPlan, depth: usize) -> CliResult {
    let indent = "  ".repeat(depth);
    let graph = JobGraph::build(plan)?;
    println!(
        "{}{} {} ({} jobs)",
        indent,
        style("◆").cyan(),
        style(&plan.workflow).bold(),
        plan.jobs.len()
    );
    if let Some(group) = plan.concurrency_group() {
        println!("{}  concurrency: {}", indent, group);
    }
    for (level, keys) in graph.levels().into_iter().enumerate() {
        println!("{}  level {}", indent, level);
        for key in keys {
            let Some(job) = plan.job(key.as_str()) else {
                continue;
            };
            match &job.work {
                JobWork::Steps { runs_on, steps, .. } => {
                    println!("{}    - {} [{}]", indent, key, runs_on);
                    for step in steps {
                        println!("{}        {}", indent, style(&step.name).dim());
                    }
                }
                JobWork::Nested { plan: nested } => {
                    println!("{}    - {} →", indent, key);
                    print_plan(nested, depth + 3)?;
                }
                JobWork::Unresolvable { error } => {
                    println!("{}    - {} {}", indent, key, style(error).red());
                }
            }
        }
    }
    Ok(())
}

async fn print_events(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(Event::JobStarted(p)) => {
                println!("{} {}", style("▶").cyan(), style(&p.job).bold());
            }
            Ok(Event::StepOutput(p)) => match p.stream {
                LogStream::Stdout => println!("  │ {}", p.line),
                LogStream::Stderr => println!("  │ {}", style(&p.line).dim()),
            },
            Ok(Event::StepCompleted(p)) => {
                let mark = match p.status {
                    StepStatus::Succeeded => style("✓").green(),
                    StepStatus::Failed => style("✗").red(),
                    _ => style("-").dim(),
                };
                println!("  {} {} ({}ms)", mark, p.step, p.duration_ms);
            }
            Ok(Event::CacheRestored(p)) => {
                println!("  {} cache {:?}: {}", style("↺").blue(), p.outcome, p.key);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_report(report: &RunReport, depth: usize) {
    let indent = "  ".repeat(depth);
    println!();
    println!(
        "{}{} {} {:?}",
        indent,
        status_mark(report.status == RunStatus::Succeeded, report.status == RunStatus::Cancelled),
        style(&report.workflow).bold(),
        report.status
    );
    for job in &report.jobs {
        print_job(job, &indent);
        if let Some(nested) = &job.nested {
            print_report(nested, depth + 2);
        }
    }
    if let Some(ms) = report.duration_ms() {
        println!("{}  finished in {}ms", indent, ms);
    }
}

fn print_job(job: &JobReport, indent: &str) {
    let mark = status_mark(
        job.status == JobStatus::Succeeded,
        matches!(job.status, JobStatus::Cancelled | JobStatus::Skipped),
    );
    println!("{}  {} {} {:?}", indent, mark, job.key, job.status);
    if let Some(error) = &job.error {
        println!("{}      {}", indent, style(error).red());
    }
}

fn status_mark(ok: bool, neutral: bool) -> console::StyledObject<&'static str> {
    if ok {
        style("✓").green()
    } else if neutral {
        style("-").yellow()
    } else {
        style("✗").red()
    }
}

fn display_opt(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none)".to_string())
}
