//! Balancer preflight check (§4.8 step 4): a sharded cluster with its
//! balancer still running must not be migrated, since chunk moves during
//! the copy would invalidate the splitter's key-range assumptions.

use bson::doc;
use mongodb::Client;

use crate::error::OrchestratorError;

pub async fn is_sharded(client: &Client) -> Result<bool, mongodb::error::Error> {
    let reply = client.database("admin").run_command(doc! { "hello": 1 }).await?;
    Ok(reply.get_str("msg").map(|m| m == "isdbgrid").unwrap_or(false))
}

pub async fn check_balancer_disabled(client: &Client, label: &'static str) -> Result<(), OrchestratorError> {
    if !is_sharded(client).await? {
        return Ok(());
    }
    let reply = client.database("admin").run_command(doc! { "balancerStatus": 1 }).await?;
    let mode = reply.get_str("mode").unwrap_or("full");
    if mode != "off" {
        return Err(OrchestratorError::BalancerEnabled(label));
    }
    Ok(())
}
