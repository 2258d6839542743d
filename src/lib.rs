pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{Settings, StorageBackend};
use crate::core::{state::AppState, telemetry, time::SystemClock};
use crate::repositories::seed::{self, SeedTarget};
use crate::repositories::{AssessmentStore, MemoryAssessmentStore, PgAssessmentStore};
use crate::services::attempt_orchestrator::AttemptOrchestrator;
use crate::services::certificate_issuer::CertificateIssuer;
use crate::services::question_selection::selector_for;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let state = build_state(settings).await?;
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        addr = %state.settings().server_addr(),
        environment = %state.settings().environment().as_str(),
        storage = state.settings().storage().backend.as_str(),
        "Course assessments API listening"
    );

    // The worker process cannot see an in-memory store, so the API sweeps it itself.
    let sweeper = (state.settings().storage().backend == StorageBackend::Memory).then(|| {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let period =
            Duration::from_secs(state.settings().assessment().expiry_sweep_interval_seconds);
        let handle =
            tokio::spawn(tasks::scheduler::expiry_sweep_loop(state.clone(), period, shutdown_rx));
        (shutdown_tx, handle)
    });

    axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await?;

    if let Some((shutdown_tx, handle)) = sweeper {
        if shutdown_tx.send(true).is_err() {
            tracing::warn!("Expiry sweeper already stopped");
        }
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Expiry sweeper join failed");
        }
    }

    Ok(())
}

pub async fn run_worker() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    if settings.storage().backend == StorageBackend::Memory {
        tracing::warn!(
            "Worker is sweeping its own in-memory store; the API process sweeps its own attempts"
        );
    }

    let state = build_state(settings).await?;
    tasks::scheduler::run(state).await
}

async fn build_state(settings: Settings) -> anyhow::Result<AppState> {
    let store = open_store(&settings).await?;
    let clock = Arc::new(SystemClock);
    let assessment = settings.assessment();

    let issuer =
        CertificateIssuer::new(store.clone(), clock.clone(), assessment.certificate_validity_days);
    let grace = time::Duration::seconds(i64::try_from(assessment.submit_grace_seconds)?);
    let orchestrator = AttemptOrchestrator::new(
        store.clone(),
        clock,
        Arc::from(selector_for(assessment.question_draw)),
        issuer,
        grace,
    );

    Ok(AppState::new(settings, store, orchestrator))
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn AssessmentStore>> {
    match settings.storage().backend {
        StorageBackend::Postgres => {
            let pool = db::init_pool(settings).await?;
            db::run_migrations(&pool, settings).await?;
            tracing::info!("Database connected and migrations applied");
            if let Some(seed_file) = &settings.storage().seed_file {
                let loaded =
                    seed::load_seed_file(SeedTarget::Postgres(&pool), Path::new(seed_file)).await?;
                tracing::info!(seed_file = %seed_file, loaded, "Seeded database");
            }
            Ok(Arc::new(PgAssessmentStore::new(pool)))
        }
        StorageBackend::Memory => {
            let store = MemoryAssessmentStore::new();
            if let Some(seed_file) = &settings.storage().seed_file {
                let loaded =
                    seed::load_seed_file(SeedTarget::Memory(&store), Path::new(seed_file)).await?;
                tracing::info!(seed_file = %seed_file, loaded, "Seeded in-memory store");
            }
            Ok(Arc::new(store))
        }
    }
}
