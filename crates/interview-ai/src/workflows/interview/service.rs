use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{
    AnswerAssessment, AnswerSubmission, AudioTask, CandidateAnswer, GeneratedQuestion,
    InterviewSession, NewAnswer, NewQuestion, NewSession, SessionId, SessionStatus, TaskEvent,
    TaskId, TaskStatus,
};
use super::scoring::ScoreOutcome;
use super::store::{InterviewStore, SessionCompletion, StoreError};
use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;

pub const STALE_TASK_REASON: &str = "processing timed out";

const SESSION_CLOSED: &str = "session is already completed";

fn session_closed() -> QueueServiceError {
    QueueServiceError::field("session_id", SESSION_CLOSED)
}

/// Answer stored by the producer, with its task when audio was attached.
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedAnswer {
    pub answer: CandidateAnswer,
    pub task: Option<AudioTask>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub task: AudioTask,
    pub events: Vec<TaskEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedTask {
    pub task: AudioTask,
    pub answer: CandidateAnswer,
    pub session_score: ScoreOutcome,
}

/// Producer, dispatcher, completion handler and aggregator over one [`InterviewStore`].
pub struct AudioQueueService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl<S> AudioQueueService<S>
where
    S: InterviewStore + 'static,
{
    pub fn new(store: Arc<S>, config: QueueConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Store a candidate answer and enqueue one pending task when it carries audio.
    pub async fn submit_answer(
        &self,
        submission: AnswerSubmission,
        actor: &str,
    ) -> Result<SubmittedAnswer, QueueServiceError> {
        let mut fields = FieldErrors::default();
        if submission.session_id.is_none() {
            fields.push("session_id", "is required");
        }
        if submission.question_id.is_none() {
            fields.push("question_id", "is required");
        }
        if submission.audio.as_ref().is_some_and(|audio| audio.is_blank()) {
            fields.push("audio", "must not be blank");
        }
        let (Some(session_id), Some(question_id)) = (submission.session_id, submission.question_id)
        else {
            return Err(fields.into_error());
        };
        fields.check()?;

        let session = self.session(session_id).await?;
        if session.status == SessionStatus::Completed {
            fields.push("session_id", SESSION_CLOSED);
        }
        match self.store.fetch_question(question_id).await? {
            Some(question) if question.session_id == session_id => {}
            Some(_) => fields.push("question_id", "question does not belong to the session"),
            None => fields.push("question_id", "question does not exist"),
        }
        fields.check()?;

        let answer = NewAnswer {
            session_id,
            question_id,
            audio: submission.audio,
        };
        let (answer, task) = self
            .store
            .insert_answer(answer, actor, self.clock.now())
            .await
            .map_err(|err| match err {
                StoreError::NotFound => QueueServiceError::NotFound(session_id.to_string()),
                StoreError::SessionMismatch => QueueServiceError::field(
                    "question_id",
                    "question does not belong to the session",
                ),
                StoreError::SessionCompleted => session_closed(),
                other => other.into(),
            })?;

        match &task {
            Some(task) => info!(
                answer_id = %answer.id,
                task_id = %task.id,
                session_id = %session_id,
                "audio answer queued for processing"
            ),
            None => info!(
                answer_id = %answer.id,
                session_id = %session_id,
                "answer stored without audio"
            ),
        }

        Ok(SubmittedAnswer { answer, task })
    }

    /// Pending tasks, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<AudioTask>, QueueServiceError> {
        Ok(self.store.pending_tasks().await?)
    }

    pub async fn task_detail(&self, id: TaskId) -> Result<TaskDetail, QueueServiceError> {
        let task = self
            .store
            .fetch_task(id)
            .await?
            .ok_or_else(|| QueueServiceError::NotFound(id.to_string()))?;
        let events = self.store.task_events(id).await?;
        Ok(TaskDetail { task, events })
    }

    /// `pending -> processing`. Losing a race yields [`QueueServiceError::ClaimConflict`].
    pub async fn claim(&self, id: TaskId, actor: &str) -> Result<AudioTask, QueueServiceError> {
        match self.store.claim_task(id, actor, self.clock.now()).await {
            Ok(task) => {
                info!(task_id = %id, actor, "audio task claimed");
                Ok(task)
            }
            Err(StoreError::StatusMismatch { current }) => {
                debug!(task_id = %id, actor, %current, "claim lost");
                Err(QueueServiceError::ClaimConflict {
                    task_id: id,
                    current,
                })
            }
            Err(err) => Err(self.transition_error(id, TaskStatus::Processing, err)),
        }
    }

    /// `processing -> done`, writing the assessment onto the answer and refreshing the
    /// session score.
    pub async fn complete(
        &self,
        id: TaskId,
        assessment: AnswerAssessment,
        actor: &str,
    ) -> Result<CompletedTask, QueueServiceError> {
        let mut fields = FieldErrors::default();
        if assessment.transcript.trim().is_empty() {
            fields.push("transcript", "must not be blank");
        }
        if !assessment.score.is_finite() {
            fields.push("score", "must be a finite number");
        } else if assessment.score < 0.0 || assessment.score > self.config.max_answer_score {
            fields.push(
                "score",
                format!("must be between 0 and {}", self.config.max_answer_score),
            );
        }
        fields.check()?;

        let (task, answer) = self
            .store
            .complete_task(id, &assessment, actor, self.clock.now())
            .await
            .map_err(|err| self.transition_error(id, TaskStatus::Done, err))?;
        info!(task_id = %id, answer_id = %answer.id, score = assessment.score, "audio task completed");

        let session_score = match self.recompute_session_score(task.session_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    task_id = %id,
                    session_id = %task.session_id,
                    error = %err,
                    "session score refresh failed after completion"
                );
                ScoreOutcome::Pending
            }
        };

        Ok(CompletedTask {
            task,
            answer,
            session_score,
        })
    }

    /// `processing -> failed`, recording the reason for operators.
    pub async fn fail(
        &self,
        id: TaskId,
        reason: &str,
        actor: &str,
    ) -> Result<AudioTask, QueueServiceError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(QueueServiceError::field("reason", "must not be blank"));
        }

        let task = self
            .store
            .fail_task(id, reason, actor, self.clock.now())
            .await
            .map_err(|err| self.transition_error(id, TaskStatus::Failed, err))?;
        warn!(task_id = %id, actor, reason, "audio task failed");
        Ok(task)
    }

    /// Operator path `failed -> pending`.
    pub async fn requeue(&self, id: TaskId, actor: &str) -> Result<AudioTask, QueueServiceError> {
        let task = self
            .store
            .requeue_task(id, actor, self.clock.now())
            .await
            .map_err(|err| self.transition_error(id, TaskStatus::Pending, err))?;
        info!(task_id = %id, actor, requeue_count = task.requeue_count, "audio task requeued");
        Ok(task)
    }

    /// Fail every processing task claimed more than `older_than` ago.
    pub async fn reap_stale(
        &self,
        older_than: Duration,
        actor: &str,
    ) -> Result<Vec<AudioTask>, QueueServiceError> {
        if older_than < Duration::zero() {
            return Err(QueueServiceError::field(
                "older_than_secs",
                "must not be negative",
            ));
        }

        let now = self.clock.now();
        let claimed_before = now
            .checked_sub_signed(older_than)
            .ok_or_else(|| QueueServiceError::field("older_than_secs", "is out of range"))?;
        let stale = self.store.stale_tasks(claimed_before).await?;
        let mut reaped = Vec::with_capacity(stale.len());
        for task in stale {
            match self.store.fail_task(task.id, STALE_TASK_REASON, actor, now).await {
                Ok(task) => reaped.push(task),
                // Finished or failed between the scan and the update.
                Err(StoreError::StatusMismatch { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        if !reaped.is_empty() {
            warn!(count = reaped.len(), actor, "stale audio tasks failed");
        }
        Ok(reaped)
    }

    /// Roll the latest scored answers into the session total once every question is scored.
    pub async fn recompute_session_score(
        &self,
        session_id: SessionId,
    ) -> Result<ScoreOutcome, QueueServiceError> {
        let completion = self
            .store
            .complete_session(session_id, self.clock.now())
            .await
            .map_err(|err| match err {
                StoreError::NotFound => QueueServiceError::NotFound(session_id.to_string()),
                other => other.into(),
            })?;

        match completion {
            SessionCompletion::Completed(session) => {
                info!(session_id = %session_id, total_score = ?session.total_score, "interview session completed");
                Ok(ScoreOutcome::Completed {
                    total_score: session.total_score.unwrap_or_default(),
                })
            }
            SessionCompletion::AlreadyCompleted(session) => Ok(ScoreOutcome::AlreadyCompleted {
                total_score: session.total_score,
            }),
            SessionCompletion::Incomplete { scored, total } => {
                Ok(ScoreOutcome::Incomplete { scored, total })
            }
        }
    }

    pub async fn create_session(
        &self,
        session: NewSession,
    ) -> Result<InterviewSession, QueueServiceError> {
        let mut fields = FieldErrors::default();
        if session.candidate_id <= 0 {
            fields.push("candidate_id", "must be a positive id");
        }
        if session.job_id <= 0 {
            fields.push("job_id", "must be a positive id");
        }
        fields.check()?;

        let session = self.store.create_session(session).await?;
        info!(session_id = %session.id, candidate_id = session.candidate_id, "interview session created");
        Ok(session)
    }

    pub async fn add_question(
        &self,
        session_id: SessionId,
        question: NewQuestion,
    ) -> Result<GeneratedQuestion, QueueServiceError> {
        let mut fields = FieldErrors::default();
        if question.question_text.trim().is_empty() {
            fields.push("question_text", "must not be blank");
        }
        if !question.weightage.is_finite() || question.weightage <= 0.0 {
            fields.push("weightage", "must be a positive number");
        }
        fields.check()?;

        self.store
            .add_question(session_id, question, self.clock.now())
            .await
            .map_err(|err| match err {
                StoreError::NotFound => QueueServiceError::NotFound(session_id.to_string()),
                StoreError::SessionCompleted => session_closed(),
                other => other.into(),
            })
    }

    pub async fn session(&self, id: SessionId) -> Result<InterviewSession, QueueServiceError> {
        self.store
            .fetch_session(id)
            .await?
            .ok_or_else(|| QueueServiceError::NotFound(id.to_string()))
    }

    pub async fn questions(
        &self,
        id: SessionId,
    ) -> Result<Vec<GeneratedQuestion>, QueueServiceError> {
        self.session(id).await?;
        Ok(self.store.session_questions(id).await?)
    }

    fn transition_error(&self, id: TaskId, to: TaskStatus, err: StoreError) -> QueueServiceError {
        match err {
            StoreError::NotFound => QueueServiceError::NotFound(id.to_string()),
            StoreError::StatusMismatch { current } => {
                debug!(task_id = %id, from = %current, to = %to, "transition refused");
                QueueServiceError::InvalidTransition {
                    task_id: id,
                    from: current,
                    to,
                }
            }
            StoreError::AnswerAlreadyScored => QueueServiceError::InvalidTransition {
                task_id: id,
                from: TaskStatus::Processing,
                to,
            },
            other => other.into(),
        }
    }
}

/// Error raised by the audio queue service.
#[derive(Debug, thiserror::Error)]
pub enum QueueServiceError {
    #[error("invalid request: {}", describe_fields(.fields))]
    Validation { fields: BTreeMap<String, String> },
    #[error("{task_id} was already claimed (currently {current})")]
    ClaimConflict { task_id: TaskId, current: TaskStatus },
    #[error("{task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl QueueServiceError {
    pub fn field(name: &str, message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(name.to_string(), message.into());
        QueueServiceError::Validation { fields }
    }
}

fn describe_fields(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(name, message)| format!("{name} {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Default)]
struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    fn push(&mut self, name: &str, message: impl Into<String>) {
        self.0.entry(name.to_string()).or_insert_with(|| message.into());
    }

    fn check(&mut self) -> Result<(), QueueServiceError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(std::mem::take(self).into_error())
        }
    }

    fn into_error(self) -> QueueServiceError {
        QueueServiceError::Validation { fields: self.0 }
    }
}
