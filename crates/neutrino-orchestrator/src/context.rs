//! `MigrationContext`: the explicit value that replaces the original tool's
//! `Migrator` singleton (see DESIGN.md's Open Question on this). Built once
//! by the CLI entry point and threaded by reference into every phase.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use neutrino_types::ResolvedConfig;
use neutrino_workspace::clients::ClientRegistry;
use neutrino_workspace::Workspace;

use crate::error::OrchestratorError;
use crate::replicas::resolve_replicas;

pub struct MigrationContext {
    pub config: ResolvedConfig,
    pub clients: ClientRegistry,
    pub workspace: Workspace,
    pub replicas: HashMap<String, String>,
    /// Cleared once the data phase drains and followers should flip to Live.
    pub is_cache: Arc<AtomicBool>,
    /// Set on SIGINT; workers and followers check it between units of work.
    pub exit: Arc<AtomicBool>,
}

impl MigrationContext {
    pub async fn establish(config: ResolvedConfig) -> Result<Self, OrchestratorError> {
        let clients = ClientRegistry::new();
        let target_client = clients.get(&config.target).await?;
        let workspace = Workspace::new(target_client, config.spool.clone());
        let replicas = resolve_replicas(&config.source).into_iter().collect();
        Ok(Self {
            config,
            clients,
            workspace,
            replicas,
            is_cache: Arc::new(AtomicBool::new(true)),
            exit: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Relaxed);
    }

    pub fn flip_followers_live(&self) {
        self.is_cache.store(false, Ordering::Relaxed);
    }
}
