//! Phase sequencing for `start` and `resume` (§4.8), grounded on
//! `original_source/start.go`/`resume.go`/`migrator.go`.

use std::collections::HashMap;
use std::time::Duration;

use mongodb::Client;
use neutrino_config::discovery::{discover_namespaces, NamespacePair};
use neutrino_types::{split_namespace, Include, Task, TaskStatus};
use neutrino_workspace::Workspace;

use crate::context::MigrationContext;
use crate::error::OrchestratorError;
use crate::preflight::check_balancer_disabled;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(60);
const STALE_LEASE_WINDOW: chrono::Duration = chrono::Duration::minutes(-10);
const LEASE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const LEASE_SWEEP_POLL: Duration = Duration::from_secs(1);

pub async fn run_start(ctx: &MigrationContext) -> Result<(), OrchestratorError> {
    ctx.workspace.log(format!("start a migration, source={}, target={}", ctx.config.source, ctx.config.target)).await?;

    let source_client = ctx.clients.get(&ctx.config.source).await?;
    let target_client = ctx.clients.get(&ctx.config.target).await?;
    let (do_data, do_oplog) = ctx.config.command.phases();

    if do_data {
        check_balancer_disabled(&source_client, "source").await?;
        check_balancer_disabled(&target_client, "target").await?;
    }

    if ctx.config.drop {
        drop_target_namespaces(&target_client, &ctx.config.includes).await?;
    }

    run_config_phase(ctx, &source_client, &target_client).await?;

    if do_data {
        ctx.workspace.reset().await?;
        run_data_and_oplog(ctx, &source_client, &target_client, do_oplog, true).await?;
    }

    ctx.workspace.log("migration complete").await?;
    Ok(())
}

pub async fn run_resume(ctx: &MigrationContext) -> Result<(), OrchestratorError> {
    ctx.workspace.log(format!("resume a migration, source={}, target={}", ctx.config.source, ctx.config.target)).await?;

    let source_client = ctx.clients.get(&ctx.config.source).await?;
    let target_client = ctx.clients.get(&ctx.config.target).await?;
    let (do_data, do_oplog) = ctx.config.command.phases();

    if do_data {
        check_balancer_disabled(&source_client, "source").await?;
        check_balancer_disabled(&target_client, "target").await?;
    }

    for parent in ctx.workspace.find_all_parent_tasks().await? {
        if parent.status == TaskStatus::Splitting {
            ctx.workspace.reset_parent_task(parent.id).await?;
        }
    }
    ctx.workspace.reset_processing_tasks().await?;

    if do_data {
        run_data_and_oplog(ctx, &source_client, &target_client, do_oplog, false).await?;
    }

    ctx.workspace.log("migration resumed and complete").await?;
    Ok(())
}

async fn run_config_phase(
    ctx: &MigrationContext,
    source_client: &Client,
    target_client: &Client,
) -> Result<(), OrchestratorError> {
    use neutrino_types::ConfigScope;
    let summary = match ctx.config.command.config_scope() {
        ConfigScope::None => return Ok(()),
        ConfigScope::IndexesOnly => {
            neutrino_config::transfer_indexes_only(source_client, target_client, &ctx.config.includes).await?
        }
        ConfigScope::Full => {
            neutrino_config::transfer_config(source_client, target_client, &ctx.config.includes).await?
        }
    };
    tracing::info!(
        namespaces = summary.namespaces,
        collections = summary.collections_created,
        indexes = summary.indexes_created,
        "config phase complete"
    );
    Ok(())
}

async fn run_data_and_oplog(
    ctx: &MigrationContext,
    source_client: &Client,
    target_client: &Client,
    do_oplog: bool,
    seed_parents: bool,
) -> Result<(), OrchestratorError> {
    let replica_clients = source_replica_clients(ctx, source_client).await?;
    let lease_sweep_handle = launch_lease_sweep(ctx);

    let follower_handles = if do_oplog {
        launch_followers(ctx, &replica_clients, target_client.clone())
    } else {
        Vec::new()
    };
    let worker_handles = launch_workers(ctx, &replica_clients, target_client.clone());

    // On a fresh start, split the just-seeded in-memory parents directly
    // rather than re-reading them back from the workspace: a worker can
    // already be racing to claim one (it's Added the moment it's inserted),
    // and a zero-document parent it claims and completes would vanish from
    // a DB re-read's Completed filter before the splitter ever saw it,
    // leaking an unsplit namespace. The teacher's own `Splitter(tasks)`
    // splits the in-memory slice it was handed for the same reason.
    let parents = if seed_parents {
        let pairs = discover_namespaces(source_client, &ctx.config.includes).await?;
        let tag = ctx.replicas.keys().next().cloned().unwrap_or_else(|| "rs0".to_string());
        let parents = build_parent_tasks(&tag, &pairs);
        ctx.workspace.insert_tasks(&parents).await?;
        parents
    } else {
        ctx.workspace.find_all_parent_tasks().await?
    };
    neutrino_splitter::split_all(&ctx.workspace, &replica_clients, parents, ctx.config.block).await?;

    wait_for_drain(ctx).await?;

    if do_oplog {
        ctx.flip_followers_live();
    } else {
        ctx.request_exit();
    }

    for handle in worker_handles {
        let _ = handle.await;
    }
    for handle in follower_handles {
        if let Err(err) = handle.await.expect("follower task panicked") {
            tracing::error!(error = %err, "follower exited with error");
        }
    }
    let _ = lease_sweep_handle.await;
    Ok(())
}

/// Periodically reclaims Processing tasks whose worker never reported back
/// within the lease window (§5, "Cancellation/timeouts"): the only
/// aliveness signal a stalled or crashed worker leaves behind.
fn launch_lease_sweep(ctx: &MigrationContext) -> tokio::task::JoinHandle<()> {
    let workspace = ctx.workspace.clone();
    let exit = ctx.exit.clone();
    tokio::spawn(async move {
        let mut last_sweep = std::time::Instant::now();
        while !exit.load(std::sync::atomic::Ordering::Relaxed) {
            if last_sweep.elapsed() >= LEASE_SWEEP_INTERVAL {
                match workspace.reset_long_running_tasks(STALE_LEASE_WINDOW).await {
                    Ok(reclaimed) if reclaimed > 0 => {
                        tracing::warn!(reclaimed, "reclaimed stale processing tasks");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!(error = %err, "lease sweep failed"),
                }
                last_sweep = std::time::Instant::now();
            }
            tokio::time::sleep(LEASE_SWEEP_POLL).await;
        }
    })
}

async fn source_replica_clients(ctx: &MigrationContext, default_client: &Client) -> Result<HashMap<String, Client>, OrchestratorError> {
    let mut map = HashMap::new();
    for (tag, uri) in &ctx.replicas {
        let client = if uri == &ctx.config.source {
            default_client.clone()
        } else {
            ctx.clients.get(uri).await?
        };
        map.insert(tag.clone(), client);
    }
    Ok(map)
}

fn launch_workers(
    ctx: &MigrationContext,
    replica_clients: &HashMap<String, Client>,
    target_client: Client,
) -> Vec<tokio::task::JoinHandle<()>> {
    let tags: Vec<String> = replica_clients.keys().cloned().collect();
    (0..ctx.config.workers)
        .map(|i| {
            let worker_id = format!("worker-{i}");
            let workspace = ctx.workspace.clone();
            let replicas = replica_clients.clone();
            let target = target_client.clone();
            let tags = tags.clone();
            let exit = ctx.exit.clone();
            tokio::spawn(neutrino_worker::run_worker(worker_id, workspace, replicas, target, tags, exit))
        })
        .collect()
}

fn launch_followers(
    ctx: &MigrationContext,
    replica_clients: &HashMap<String, Client>,
    target_client: Client,
) -> Vec<tokio::task::JoinHandle<Result<(), neutrino_oplog::OplogError>>> {
    replica_clients
        .iter()
        .map(|(tag, client)| {
            let follower = neutrino_oplog::Follower::new(tag.clone(), client.clone(), ctx.workspace.clone(), ctx.config.includes.clone());
            let target = target_client.clone();
            let is_cache = ctx.is_cache.clone();
            let exit = ctx.exit.clone();
            tokio::spawn(async move { follower.run(target, is_cache, exit).await })
        })
        .collect()
}

fn build_parent_tasks(replica_tag: &str, pairs: &[NamespacePair]) -> Vec<Task> {
    pairs
        .iter()
        .map(|pair| {
            let mut include = Include { namespace: pair.source.clone(), ..Default::default() };
            if pair.target != pair.source {
                include.to = Some(pair.target.clone());
            }
            Task::new_parent(pair.source.clone(), replica_tag.to_string(), include)
        })
        .collect()
}

async fn wait_for_drain(ctx: &MigrationContext) -> Result<(), OrchestratorError> {
    loop {
        let counts = ctx.workspace.count_all_status().await?;
        if counts.drained() {
            return Ok(());
        }
        if ctx.exit.load(std::sync::atomic::Ordering::Relaxed) {
            return Ok(());
        }
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}

async fn drop_target_namespaces(target: &Client, includes: &[Include]) -> Result<(), OrchestratorError> {
    if includes.is_empty() {
        for db in target.list_database_names().await? {
            if db == "admin" || db == "local" || db == "config" || db == neutrino_workspace::META_DB_NAME {
                continue;
            }
            tracing::debug!(database = %db, "dropping database");
            target.database(&db).drop().await?;
        }
        return Ok(());
    }
    for include in includes {
        let (db, coll) = split_namespace(&include.namespace);
        if coll.is_empty() || coll == "*" {
            tracing::debug!(database = %db, "dropping database");
            target.database(&db).drop().await?;
            continue;
        }
        let (to_db, to_coll) = match include.to.as_deref() {
            Some(to) => split_namespace(to),
            None => (db, coll),
        };
        tracing::info!(namespace = format!("{to_db}.{to_coll}"), "dropping namespace");
        target.database(&to_db).collection::<bson::Document>(&to_coll).drop().await?;
    }
    Ok(())
}
