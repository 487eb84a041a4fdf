use crate::cli::ServeArgs;
use crate::infra::AppState;
use crate::routes::with_interview_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use interview_ai::config::{AppConfig, StorageConfig};
use interview_ai::error::AppError;
use interview_ai::telemetry;
use interview_ai::workflows::interview::{
    AudioQueueService, InterviewStore, MemoryInterviewStore, SqliteInterviewStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    match config.storage.clone() {
        StorageConfig::Memory => {
            warn!("APP_DATABASE_URL unset; interview data will not survive a restart");
            serve_with(Arc::new(MemoryInterviewStore::default()), config).await
        }
        StorageConfig::Sqlite { url } => {
            let store = SqliteInterviewStore::connect(&url).await?;
            info!("interview store opened");
            serve_with(Arc::new(store), config).await
        }
    }
}

async fn serve_with<S>(store: Arc<S>, config: AppConfig) -> Result<(), AppError>
where
    S: InterviewStore + 'static,
{
    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let service = Arc::new(AudioQueueService::new(store, config.queue.clone()));
    let app = with_interview_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        max_answer_score = config.queue.max_answer_score,
        "interview answer queue ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
