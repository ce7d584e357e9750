pub mod accounts;
pub mod api;
pub mod billing;
pub mod config;
pub mod db;
pub mod docs;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod payments;
pub mod recovery;
pub mod storage;
pub mod transactions;

use std::sync::Arc;
use std::time::Duration;

use accounts::UserStore;
use billing::Reconciler;
use config::AuthSettings;
use jobs::JobStore;
use ledger::Ledger;
use orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub ledger: Arc<dyn Ledger>,
    pub jobs: Arc<dyn JobStore>,
    pub orchestrator: Orchestrator,
    pub reconciler: Reconciler,
    pub auth: AuthSettings,
}

/// Outbound client for vendor APIs. Every request gives up after `timeout`.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
}
