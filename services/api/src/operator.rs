//! Queue maintenance commands run against the configured database.

use crate::infra::{open_persistent_store, operator};
use chrono::Duration;
use clap::Args;
use interview_ai::access::Capability;
use interview_ai::config::AppConfig;
use interview_ai::error::AppError;
use interview_ai::telemetry;
use interview_ai::workflows::interview::{AudioQueueService, AudioTask, InterviewStore, TaskId};
use serde::Serialize;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct RequeueArgs {
    /// Failed task to move back to pending
    #[arg(long)]
    pub(crate) task_id: i64,
}

#[derive(Args, Debug)]
pub(crate) struct ReapArgs {
    /// Fail processing tasks claimed longer ago than this many seconds
    #[arg(long, default_value_t = 900)]
    pub(crate) older_than_secs: u64,
}

pub(crate) enum TaskAction {
    Pending,
    Requeue(RequeueArgs),
    Reap(ReapArgs),
}

pub(crate) async fn run_task_command(action: TaskAction) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let store = Arc::new(open_persistent_store(&config).await?);
    let service = AudioQueueService::new(store, config.queue.clone());
    let tasks = execute(&service, action).await?;
    println!("{}", render(&tasks)?);
    Ok(())
}

pub(crate) async fn execute<S>(
    service: &AudioQueueService<S>,
    action: TaskAction,
) -> Result<Vec<AudioTask>, AppError>
where
    S: InterviewStore + 'static,
{
    match action {
        TaskAction::Pending => {
            operator(Capability::ViewQueue)?;
            Ok(service.list_pending().await?)
        }
        TaskAction::Requeue(args) => {
            let principal = operator(Capability::RequeueTask)?;
            let task = service
                .requeue(TaskId(args.task_id), &principal.audit_label())
                .await?;
            Ok(vec![task])
        }
        TaskAction::Reap(args) => {
            let principal = operator(Capability::RequeueTask)?;
            let older_than = i64::try_from(args.older_than_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .ok_or_else(|| {
                    AppError::Operator(format!(
                        "--older-than-secs {} is out of range",
                        args.older_than_secs
                    ))
                })?;
            Ok(service
                .reap_stale(older_than, &principal.audit_label())
                .await?)
        }
    }
}

pub(crate) fn render<T: Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Operator(format!("failed to render output: {err}")))
}
