//! A dependency-injected registry of MongoDB client handles, keyed by URI.
//!
//! The original tool kept a single global, mutex-guarded `map[string]*mongo.Client`
//! (see DESIGN.md's "process-wide client pool" note). Here that shared mutable
//! state is an explicit value constructed once by the orchestrator and passed
//! by reference into every worker, splitter, and follower, rather than reached
//! for through a singleton.
use std::collections::HashMap;
use std::sync::Arc;

use mongodb::Client;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashMap<String, Client>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a pooled client for `uri`, establishing one on first use.
    pub async fn get(&self, uri: &str) -> mongodb::error::Result<Client> {
        let mut guard = self.clients.lock().await;
        if let Some(client) = guard.get(uri) {
            return Ok(client.clone());
        }
        let client = Client::with_uri_str(uri).await?;
        guard.insert(uri.to_string(), client.clone());
        Ok(client)
    }
}
