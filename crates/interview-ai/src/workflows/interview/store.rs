use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::domain::{
    AnswerAssessment, AnswerId, AudioTask, CandidateAnswer, ErrorLogEntry, GeneratedQuestion,
    InterviewSession, NewAnswer, NewQuestion, NewSession, QuestionId, SessionId, TaskEvent,
    TaskId, TaskStatus,
};

/// Persistence boundary for sessions, answers and the audio task queue.
///
/// Every method that changes task status is a compare-and-swap against the stored status and
/// appends its audit event in the same unit of work. Implementations must never apply a
/// transition after observing a different status than the one the edge starts from.
#[async_trait]
pub trait InterviewStore: Send + Sync {
    async fn create_session(&self, session: NewSession) -> Result<InterviewSession, StoreError>;

    async fn fetch_session(&self, id: SessionId) -> Result<Option<InterviewSession>, StoreError>;

    /// Fails with [`StoreError::NotFound`] when the session does not exist and with
    /// [`StoreError::SessionCompleted`] once it has been scored.
    async fn add_question(
        &self,
        session_id: SessionId,
        question: NewQuestion,
        at: DateTime<Utc>,
    ) -> Result<GeneratedQuestion, StoreError>;

    async fn fetch_question(&self, id: QuestionId)
        -> Result<Option<GeneratedQuestion>, StoreError>;

    /// Questions of a session in creation order.
    async fn session_questions(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<GeneratedQuestion>, StoreError>;

    /// Answers of a session ordered by `created_at`, then id.
    async fn session_answers(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<CandidateAnswer>, StoreError>;

    async fn fetch_answer(&self, id: AnswerId) -> Result<Option<CandidateAnswer>, StoreError>;

    /// Writes the answer and, when audio is attached, exactly one pending task for it.
    /// Both records persist or neither does. A `created` session moves to `ongoing`; a
    /// completed session refuses the answer with [`StoreError::SessionCompleted`].
    async fn insert_answer(
        &self,
        answer: NewAnswer,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(CandidateAnswer, Option<AudioTask>), StoreError>;

    async fn fetch_task(&self, id: TaskId) -> Result<Option<AudioTask>, StoreError>;

    /// Pending tasks, oldest first (ties broken by id).
    async fn pending_tasks(&self) -> Result<Vec<AudioTask>, StoreError>;

    /// Processing tasks claimed strictly before `claimed_before`, oldest claim first.
    async fn stale_tasks(&self, claimed_before: DateTime<Utc>)
        -> Result<Vec<AudioTask>, StoreError>;

    async fn task_events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError>;

    /// `pending -> processing`.
    async fn claim_task(
        &self,
        id: TaskId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError>;

    /// `processing -> done` and the write-once answer fields, as one unit.
    async fn complete_task(
        &self,
        id: TaskId,
        assessment: &AnswerAssessment,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(AudioTask, CandidateAnswer), StoreError>;

    /// `processing -> failed`, recording the reason on the task and in the error log.
    async fn fail_task(
        &self,
        id: TaskId,
        reason: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError>;

    /// `failed -> pending`, clearing claim metadata.
    async fn requeue_task(
        &self,
        id: TaskId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError>;

    /// Tallies the session's latest scored answers and, when every question is scored,
    /// marks it completed. The tally and the write see the same questions and answers.
    async fn complete_session(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<SessionCompletion, StoreError>;

    async fn error_log(&self) -> Result<Vec<ErrorLogEntry>, StoreError>;
}

/// Result of the session completion compare-and-swap.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCompletion {
    Completed(InterviewSession),
    AlreadyCompleted(InterviewSession),
    Incomplete { scored: usize, total: usize },
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("task is {current}")]
    StatusMismatch { current: TaskStatus },
    #[error("answer has already been scored")]
    AnswerAlreadyScored,
    #[error("question does not belong to the session")]
    SessionMismatch,
    #[error("session is already completed")]
    SessionCompleted,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub(crate) const TASK_ERROR_EVENT: &str = "audio_task_failed";
