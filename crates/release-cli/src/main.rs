//! Release Control Plane CLI
//!
//! The `ctrlplane` command loads a workspace fixture (systems, environments,
//! deployments, resources, versions, variables, policies and approvals as
//! JSON), reconciles release targets and drives the release engine.
//!
//! ## Commands
//!
//! - `targets`: List release targets and their latest release
//! - `evaluate`: Evaluate one or more release targets
//! - `rollout-status`: Show where a target sits in a version's rollout
//! - `selector-diff`: Preview an environment selector change
//! - `validate-policy`: Check a policy document before it is written
//! - `pin`: Pin or unpin a release on a target
//! - `job-update`: Apply a job status callback
//! - `run`: Run the re-evaluation worker until interrupted

mod workspace;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use release_core::{diff, Condition, EngineConfig, Environment, JobUpdate, Policy};
use release_state::{DeploymentVersionId, EnvironmentId, JobId, JobStatus, ReleaseId, ReleaseTargetId};
use serde_json::{json, Value};
use tracing::{info, Level};

use crate::workspace::Workspace;

#[derive(Parser)]
#[command(name = "ctrlplane")]
#[command(author = "Stevedores Org")]
#[command(version = release_core::VERSION)]
#[command(about = "Policy-driven release control plane", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Workspace fixture (JSON catalog snapshot)
    #[arg(short, long, global = true, env = "CTRLPLANE_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// SurrealDB endpoint for release state (default: in-process memory)
    #[arg(long, global = true, env = "SURREALDB_URL")]
    store_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List release targets
    Targets,

    /// Evaluate release targets and create releases and jobs
    Evaluate {
        /// Release target ids
        targets: Vec<ReleaseTargetId>,

        /// Evaluate every release target
        #[arg(long, conflicts_with = "targets")]
        all: bool,
    },

    /// Show a target's position and time in a version's rollout
    RolloutStatus {
        #[arg(long)]
        target: ReleaseTargetId,

        #[arg(long)]
        version: DeploymentVersionId,
    },

    /// Preview which resources a new environment selector adds or removes
    SelectorDiff {
        #[arg(long)]
        environment: EnvironmentId,

        /// New selector (JSON condition); omit to clear the selector
        #[arg(long)]
        selector: Option<PathBuf>,

        /// Apply the change: create and delete release targets
        #[arg(long)]
        apply: bool,
    },

    /// Validate a policy document (JSON)
    ValidatePolicy {
        path: PathBuf,
    },

    /// Pin a release on a target; omit --release to clear the pin
    Pin {
        #[arg(long)]
        target: ReleaseTargetId,

        #[arg(long)]
        release: Option<ReleaseId>,
    },

    /// Apply a job status callback
    JobUpdate {
        #[arg(long)]
        job: JobId,

        /// New status (pending, in_progress, successful, failure, ...)
        #[arg(long)]
        status: String,

        #[arg(long)]
        message: Option<String>,

        #[arg(long)]
        external_id: Option<String>,
    },

    /// Run the re-evaluation worker until Ctrl-C
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    release_core::telemetry::init_tracing(cli.json, level);

    let fixture = cli.workspace.as_deref();
    let store_url = cli.store_url.as_deref();
    let output = match cli.command {
        // Policy validation needs no workspace.
        Commands::ValidatePolicy { path } => cmd_validate_policy(&path)?,
        Commands::Targets => cmd_targets(&open(fixture, store_url).await?).await?,
        Commands::Evaluate { targets, all } => {
            cmd_evaluate(&open(fixture, store_url).await?, targets, all).await?
        }
        Commands::RolloutStatus { target, version } => {
            cmd_rollout_status(&open(fixture, store_url).await?, &target, &version).await?
        }
        Commands::SelectorDiff {
            environment,
            selector,
            apply,
        } => {
            let ws = open(fixture, store_url).await?;
            cmd_selector_diff(&ws, environment, selector.as_deref(), apply).await?
        }
        Commands::Pin { target, release } => {
            cmd_pin(&open(fixture, store_url).await?, &target, release).await?
        }
        Commands::JobUpdate {
            job,
            status,
            message,
            external_id,
        } => {
            let ws = open(fixture, store_url).await?;
            cmd_job_update(&ws, &job, &status, message, external_id).await?
        }
        Commands::Run => {
            let mut ws = open(fixture, store_url).await?;
            return cmd_run(&mut ws).await;
        }
    };
    print(output)
}

/// Load the workspace fixture with engine settings from the environment
async fn open(fixture: Option<&Path>, store_url: Option<&str>) -> Result<Workspace> {
    let fixture =
        fixture.context("No workspace fixture given (use --workspace or CTRLPLANE_WORKSPACE)")?;
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    Workspace::load(fixture, store_url, config).await
}

fn print(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {what}: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {what}: {:?}", path))
}

/// List release targets with names and their newest release
async fn cmd_targets(ws: &Workspace) -> Result<Value> {
    let mut rows = Vec::new();
    let mut targets = ws.targets.list_targets().await?;
    targets.sort_by_key(|t| t.created_at);
    for target in targets {
        let latest = ws.releases.latest_release(&target.id).await?;
        let ctx = ws.engine.context(target).await?;
        rows.push(json!({
            "id": ctx.target.id,
            "resource": ctx.resource.name,
            "environment": ctx.environment.name,
            "deployment": ctx.deployment.name,
            "desired_release_id": ctx.target.desired_release_id,
            "latest_release_id": latest.map(|r| r.id),
        }));
    }
    Ok(Value::Array(rows))
}

/// Evaluate the given targets (or all of them) against one policy snapshot
async fn cmd_evaluate(ws: &Workspace, targets: Vec<ReleaseTargetId>, all: bool) -> Result<Value> {
    let results = if all {
        ws.engine.evaluate_every_target().await?
    } else {
        if targets.is_empty() {
            anyhow::bail!("No release targets given (pass ids or --all)");
        }
        let snapshot = ws.engine.policy_snapshot().await?;
        ws.engine.evaluate_all(targets, &snapshot).await
    };

    let rows: Vec<Value> = results
        .into_iter()
        .map(|(id, result)| match result {
            Ok(outcome) => json!({ "release_target_id": id, "result": outcome }),
            Err(err) => json!({ "release_target_id": id, "error": err.to_string() }),
        })
        .collect();
    info!(evaluated = rows.len(), "evaluation complete");
    Ok(Value::Array(rows))
}

async fn cmd_rollout_status(
    ws: &Workspace,
    target: &ReleaseTargetId,
    version: &DeploymentVersionId,
) -> Result<Value> {
    let snapshot = ws.engine.policy_snapshot().await?;
    let status = ws
        .engine
        .get_rollout_status(target, version, &snapshot)
        .await
        .with_context(|| format!("Failed to compute rollout status for target {target}"))?;
    Ok(match status {
        Some(status) => serde_json::to_value(status)?,
        None => json!({ "release_target_id": target, "rollout": null }),
    })
}

/// Diff an environment's current selector against a new one
async fn cmd_selector_diff(
    ws: &Workspace,
    environment_id: EnvironmentId,
    selector: Option<&Path>,
    apply: bool,
) -> Result<Value> {
    let new: Option<Condition> = selector
        .map(|path| read_json(path, "selector"))
        .transpose()?;
    if let Some(condition) = &new {
        condition.validate().context("Invalid selector")?;
    }

    let environment = release_core::Catalog::get_environment(ws.catalog.as_ref(), &environment_id)
        .await?
        .with_context(|| format!("Environment not found: {environment_id}"))?;
    let old = environment.resource_selector.clone();

    if apply {
        ws.catalog.upsert_environment(Environment {
            resource_selector: new.clone(),
            ..environment
        })?;
        let change = ws
            .engine
            .on_selector_changed(environment_id, old.as_ref(), new.as_ref())
            .await?;
        return Ok(serde_json::to_value(change)?);
    }

    let resources = release_core::Catalog::list_resources(ws.catalog.as_ref()).await?;
    Ok(serde_json::to_value(diff(old.as_ref(), new.as_ref(), &resources))?)
}

/// Parse and validate a policy document
fn cmd_validate_policy(path: &Path) -> Result<Value> {
    let policy: Policy = read_json(path, "policy")?;
    policy
        .validate()
        .with_context(|| format!("Policy '{}' is invalid", policy.name))?;
    Ok(json!({
        "id": policy.id,
        "name": policy.name,
        "valid": true,
    }))
}

async fn cmd_pin(ws: &Workspace, target: &ReleaseTargetId, release: Option<ReleaseId>) -> Result<Value> {
    let record = ws.engine.set_desired_release(target, release).await?;
    match release {
        Some(release_id) => info!(%target, %release_id, "release pinned"),
        None => info!(%target, "release pin cleared"),
    }
    Ok(serde_json::to_value(record)?)
}

async fn cmd_job_update(
    ws: &Workspace,
    job: &JobId,
    status: &str,
    message: Option<String>,
    external_id: Option<String>,
) -> Result<Value> {
    let status: JobStatus = status.parse().map_err(anyhow::Error::msg)?;
    let mut update = JobUpdate::status(status);
    if let Some(message) = message {
        update = update.with_message(message);
    }
    if let Some(external_id) = external_id {
        update = update.with_external_id(external_id);
    }
    let job = ws
        .engine
        .on_status_update(job, update)
        .await
        .with_context(|| format!("Failed to update job {job}"))?;
    Ok(serde_json::to_value(job)?)
}

/// Evaluate every target once, then keep draining the re-evaluation queue
async fn cmd_run(ws: &mut Workspace) -> Result<()> {
    let receiver = ws
        .receiver
        .take()
        .context("Re-evaluation worker already running")?;
    ws.engine.evaluate_every_target().await?;
    info!("re-evaluation worker started; press Ctrl-C to stop");
    ws.engine
        .run_until(receiver, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "failed to listen for Ctrl-C");
            }
        })
        .await;
    Ok(())
}
