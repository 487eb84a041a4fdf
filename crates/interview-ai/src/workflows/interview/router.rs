use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::domain::{
    AnswerAssessment, AnswerSubmission, NewQuestion, NewSession, SessionId, TaskId, TaskStatus,
};
use super::service::{AudioQueueService, QueueServiceError};
use super::store::InterviewStore;
use crate::access::{Capability, Principal};

type SharedService<S> = State<Arc<AudioQueueService<S>>>;

/// Router builder exposing the answer intake, worker queue and session endpoints.
pub fn interview_router<S>(service: Arc<AudioQueueService<S>>) -> Router
where
    S: InterviewStore + 'static,
{
    Router::new()
        .route("/api/v1/answers", post(submit_answer_handler::<S>))
        .route("/api/v1/tasks/pending", get(pending_tasks_handler::<S>))
        .route("/api/v1/tasks/reap", post(reap_handler::<S>))
        .route(
            "/api/v1/tasks/:task_id",
            get(task_detail_handler::<S>).patch(update_task_handler::<S>),
        )
        .route("/api/v1/sessions", post(create_session_handler::<S>))
        .route("/api/v1/sessions/:session_id", get(session_handler::<S>))
        .route(
            "/api/v1/sessions/:session_id/questions",
            get(questions_handler::<S>).post(add_question_handler::<S>),
        )
        .route(
            "/api/v1/sessions/:session_id/score",
            post(recompute_score_handler::<S>),
        )
        .with_state(service)
}

/// Body of `PATCH /api/v1/tasks/:task_id`. Which fields matter depends on `status`.
#[derive(Debug, Default, Deserialize)]
pub struct TaskUpdate {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub ai_feedback: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReapRequest {
    pub older_than_secs: u64,
}

pub(crate) async fn submit_answer_handler<S>(
    State(service): SharedService<S>,
    principal: Principal,
    body: Result<Json<AnswerSubmission>, JsonRejection>,
) -> Response
where
    S: InterviewStore + 'static,
{
    if let Err(denied) = principal.require(Capability::SubmitAnswer) {
        return denied.into_response();
    }
    let Json(submission) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };

    match service
        .submit_answer(submission, &principal.audit_label())
        .await
    {
        Ok(submitted) => (StatusCode::CREATED, Json(submitted)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn pending_tasks_handler<S>(
    State(service): SharedService<S>,
    principal: Principal,
) -> Response
where
    S: InterviewStore + 'static,
{
    if let Err(denied) = principal.require(Capability::ViewQueue) {
        return denied.into_response();
    }

    match service.list_pending().await {
        Ok(tasks) => (StatusCode::OK, Json(tasks)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn task_detail_handler<S>(
    State(service): SharedService<S>,
    principal: Principal,
    Path(task_id): Path<i64>,
) -> Response
where
    S: InterviewStore + 'static,
{
    if let Err(denied) = principal.require(Capability::ViewQueue) {
        return denied.into_response();
    }

    match service.task_detail(TaskId(task_id)).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn update_task_handler<S>(
    State(service): SharedService<S>,
    principal: Principal,
    Path(task_id): Path<i64>,
    body: Result<Json<TaskUpdate>, JsonRejection>,
) -> Response
where
    S: InterviewStore + 'static,
{
    let Json(update) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };
    let target = match update.status.as_deref() {
        None => return error_response(QueueServiceError::field("status", "is required")),
        Some(raw) => match TaskStatus::parse(raw) {
            Some(status) => status,
            None => {
                return error_response(QueueServiceError::field(
                    "status",
                    "must be one of processing, done, failed, pending",
                ))
            }
        },
    };

    let capability = match target {
        TaskStatus::Pending => Capability::RequeueTask,
        TaskStatus::Processing | TaskStatus::Done | TaskStatus::Failed => Capability::ProcessTask,
    };
    if let Err(denied) = principal.require(capability) {
        return denied.into_response();
    }

    let id = TaskId(task_id);
    let actor = principal.audit_label();
    let result = match target {
        TaskStatus::Processing => service
            .claim(id, &actor)
            .await
            .map(|task| Json(task).into_response()),
        TaskStatus::Done => {
            let assessment = match assessment_from(update) {
                Ok(assessment) => assessment,
                Err(err) => return error_response(err),
            };
            service
                .complete(id, assessment, &actor)
                .await
                .map(|completed| Json(completed).into_response())
        }
        TaskStatus::Failed => service
            .fail(id, update.reason.as_deref().unwrap_or_default(), &actor)
            .await
            .map(|task| Json(task).into_response()),
        TaskStatus::Pending => service
            .requeue(id, &actor)
            .await
            .map(|task| Json(task).into_response()),
    };

    result.unwrap_or_else(error_response)
}

fn assessment_from(update: TaskUpdate) -> Result<AnswerAssessment, QueueServiceError> {
    match (update.transcript, update.score) {
        (Some(transcript), Some(score)) => Ok(AnswerAssessment {
            transcript,
            ai_feedback: update.ai_feedback.unwrap_or_default(),
            score,
        }),
        (None, _) => Err(QueueServiceError::field("transcript", "is required")),
        (Some(_), None) => Err(QueueServiceError::field("score", "is required")),
    }
}

pub(crate) async fn reap_handler<S>(
    State(service): SharedService<S>,
    principal: Principal,
    body: Result<Json<ReapRequest>, JsonRejection>,
) -> Response
where
    S: InterviewStore + 'static,
{
    if let Err(denied) = principal.require(Capability::RequeueTask) {
        return denied.into_response();
    }
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };
    let Some(older_than) = i64::try_from(request.older_than_secs)
        .ok()
        .and_then(Duration::try_seconds)
    else {
        return error_response(QueueServiceError::field("older_than_secs", "is out of range"));
    };

    match service
        .reap_stale(older_than, &principal.audit_label())
        .await
    {
        Ok(reaped) => (StatusCode::OK, Json(reaped)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn create_session_handler<S>(
    State(service): SharedService<S>,
    principal: Principal,
    body: Result<Json<NewSession>, JsonRejection>,
) -> Response
where
    S: InterviewStore + 'static,
{
    if let Err(denied) = principal.require(Capability::ManageSessions) {
        return denied.into_response();
    }
    let Json(session) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };

    match service.create_session(session).await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn session_handler<S>(
    State(service): SharedService<S>,
    principal: Principal,
    Path(session_id): Path<i64>,
) -> Response
where
    S: InterviewStore + 'static,
{
    if let Err(denied) = principal.require(Capability::ViewSession) {
        return denied.into_response();
    }

    match service.session(SessionId(session_id)).await {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn questions_handler<S>(
    State(service): SharedService<S>,
    principal: Principal,
    Path(session_id): Path<i64>,
) -> Response
where
    S: InterviewStore + 'static,
{
    if let Err(denied) = principal.require(Capability::ViewSession) {
        return denied.into_response();
    }

    match service.questions(SessionId(session_id)).await {
        Ok(questions) => (StatusCode::OK, Json(questions)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn add_question_handler<S>(
    State(service): SharedService<S>,
    principal: Principal,
    Path(session_id): Path<i64>,
    body: Result<Json<NewQuestion>, JsonRejection>,
) -> Response
where
    S: InterviewStore + 'static,
{
    if let Err(denied) = principal.require(Capability::ManageSessions) {
        return denied.into_response();
    }
    let Json(question) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };

    match service.add_question(SessionId(session_id), question).await {
        Ok(question) => (StatusCode::CREATED, Json(question)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn recompute_score_handler<S>(
    State(service): SharedService<S>,
    principal: Principal,
    Path(session_id): Path<i64>,
) -> Response
where
    S: InterviewStore + 'static,
{
    if let Err(denied) = principal.require(Capability::RecomputeScore) {
        return denied.into_response();
    }

    match service.recompute_session_score(SessionId(session_id)).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

fn rejection_response(rejection: JsonRejection) -> Response {
    let payload = json!({ "error": rejection.body_text() });
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

pub(crate) fn error_response(err: QueueServiceError) -> Response {
    match err {
        QueueServiceError::Validation { ref fields } => {
            let payload = json!({
                "error": err.to_string(),
                "fields": fields,
            });
            (StatusCode::BAD_REQUEST, Json(payload)).into_response()
        }
        QueueServiceError::ClaimConflict { current, .. } => {
            let payload = json!({
                "error": err.to_string(),
                "current_status": current,
                "retriable": true,
            });
            (StatusCode::CONFLICT, Json(payload)).into_response()
        }
        QueueServiceError::InvalidTransition { from, .. } => {
            let payload = json!({
                "error": err.to_string(),
                "current_status": from,
                "retriable": false,
            });
            (StatusCode::CONFLICT, Json(payload)).into_response()
        }
        QueueServiceError::NotFound(_) => {
            let payload = json!({ "error": err.to_string() });
            (StatusCode::NOT_FOUND, Json(payload)).into_response()
        }
        QueueServiceError::Storage(ref source) => {
            error!(error = %source, "interview store failure");
            let payload = json!({ "error": "storage unavailable" });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}
