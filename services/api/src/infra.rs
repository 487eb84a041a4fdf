use interview_ai::access::{Capability, Principal, Role};
use interview_ai::config::{AppConfig, StorageConfig};
use interview_ai::error::AppError;
use interview_ai::workflows::interview::SqliteInterviewStore;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Actor recorded in task events for commands issued from the terminal.
pub(crate) const OPERATOR_ACTOR: &str = "cli";

/// Operator commands act as an admin and must still hold the capability they exercise.
pub(crate) fn operator(capability: Capability) -> Result<Principal, AppError> {
    let principal = Principal::with_actor(Role::Admin, OPERATOR_ACTOR);
    principal
        .require(capability)
        .map_err(|err| AppError::Operator(err.to_string()))?;
    Ok(principal)
}

/// Opens the configured database; queue commands have nothing to inspect in a fresh memory store.
pub(crate) async fn open_persistent_store(
    config: &AppConfig,
) -> Result<SqliteInterviewStore, AppError> {
    match &config.storage {
        StorageConfig::Sqlite { url } => Ok(SqliteInterviewStore::connect(url).await?),
        StorageConfig::Memory => Err(AppError::Operator(
            "APP_DATABASE_URL must point at the queue database for task commands".to_string(),
        )),
    }
}
