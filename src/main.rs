// src/main.rs
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use dotenvy::dotenv;
use std::io;
use std::sync::Arc;
use utoipa::OpenApi;

use produktai::accounts::PgUserStore;
use produktai::billing::Reconciler;
use produktai::config::Config;
use produktai::jobs::PgJobStore;
use produktai::ledger::PgLedger;
use produktai::orchestrator::Orchestrator;
use produktai::payments::stripe::StripeClient;
use produktai::recovery::start_recovery_sweeper;
use produktai::storage::S3ImageStorage;
use produktai::transactions::PgTransactionStore;
use produktai::{api, db, docs, engine, AppState};

async fn openapi_json() -> HttpResponse {
    HttpResponse::Ok().json(docs::ApiDoc::openapi())
}

fn startup_error(what: &str, e: impl std::fmt::Display) -> io::Error {
    log::error!("{what}: {e}");
    io::Error::other(format!("{what}: {e}"))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| startup_error("invalid configuration", e))?;

    let pool = db::connect(&config.database_url)
        .await
        .map_err(|e| startup_error("failed to connect to DB", e))?;

    let ledger = Arc::new(PgLedger::new(pool.clone()));
    let users = Arc::new(PgUserStore::new(pool.clone()));
    let jobs = Arc::new(PgJobStore::new(pool.clone()));
    let transactions = Arc::new(PgTransactionStore::new(pool.clone()));

    let generator =
        engine::from_config(&config).map_err(|e| startup_error("image engine", e))?;
    log::info!("image engine: {}", generator.name());

    let storage = Arc::new(
        S3ImageStorage::from_env(
            config.s3_bucket.clone(),
            config.s3_endpoint.clone(),
            config.s3_public_base_url.clone(),
        )
        .await,
    );

    let stripe_http = produktai::http_client(config.stripe_timeout)
        .map_err(|e| startup_error("stripe http client", e))?;
    let stripe = Arc::new(StripeClient::new(
        stripe_http,
        &config.stripe_api_base,
        config.stripe_api_key.clone(),
        config.stripe_webhook_secret.clone(),
    ));

    let orchestrator = Orchestrator::new(
        ledger.clone(),
        jobs.clone(),
        generator,
        storage,
        config.generation.clone(),
    );
    let reconciler = Reconciler::new(ledger.clone(), transactions, stripe);

    start_recovery_sweeper(orchestrator.clone());

    let state = web::Data::new(AppState {
        users,
        ledger,
        jobs,
        orchestrator,
        reconciler,
        auth: config.auth.clone(),
    });

    let jwt_secret = config.auth.jwt_secret.clone();
    log::info!("listening on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .route("/api-docs/openapi.json", web::get().to(openapi_json))
            .configure(|cfg| api::configure(cfg, &jwt_secret))
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
