// src/recovery.rs

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::orchestrator::Orchestrator;

/// Fails and refunds jobs left in `processing` by a previous process, then keeps
/// sweeping on the configured interval for jobs whose worker never reported back.
pub fn start_recovery_sweeper(orchestrator: Orchestrator) -> JoinHandle<()> {
    let interval = orchestrator.settings().recovery_interval;
    tokio::spawn(async move {
        loop {
            match orchestrator.recover_stale(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => log::warn!("recovery sweep failed and refunded {n} stale job(s)"),
                Err(e) => log::error!("recovery sweep error: {e}"),
            }
            tokio::time::sleep(interval).await;
        }
    })
}
