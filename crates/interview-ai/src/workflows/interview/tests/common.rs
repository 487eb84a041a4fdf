use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::access::ROLE_HEADER;
use crate::clock::ManualClock;
use crate::config::QueueConfig;
use crate::workflows::interview::domain::{
    AnswerAssessment, AnswerId, AnswerSubmission, AudioRef, AudioTask, CandidateAnswer,
    ErrorLogEntry, GeneratedQuestion, InterviewSession, NewAnswer, NewQuestion, NewSession,
    QuestionId, SessionId, SessionStatus, TaskEvent, TaskId,
};
use crate::workflows::interview::memory::MemoryInterviewStore;
use crate::workflows::interview::service::AudioQueueService;
use crate::workflows::interview::store::{InterviewStore, SessionCompletion, StoreError};
use crate::workflows::interview::interview_router;

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn build_service() -> (
    AudioQueueService<MemoryInterviewStore>,
    Arc<MemoryInterviewStore>,
    Arc<ManualClock>,
) {
    let store = Arc::new(MemoryInterviewStore::default());
    let clock = Arc::new(ManualClock::new(start()));
    let service = AudioQueueService::with_clock(store.clone(), QueueConfig::default(), clock.clone());
    (service, store, clock)
}

/// Session with two questions weighted 2 and 1.
pub(super) async fn seeded_session<S>(
    service: &AudioQueueService<S>,
) -> (InterviewSession, Vec<GeneratedQuestion>)
where
    S: InterviewStore + 'static,
{
    let session = service
        .create_session(NewSession {
            candidate_id: 11,
            job_id: 7,
        })
        .await
        .expect("session created");

    let mut questions = Vec::new();
    for (text, weightage) in [
        ("Walk through a production incident you owned.", 2.0),
        ("How do you review a pull request?", 1.0),
    ] {
        let question = service
            .add_question(
                session.id,
                NewQuestion {
                    question_text: text.to_string(),
                    expected_answer: None,
                    weightage,
                },
            )
            .await
            .expect("question added");
        questions.push(question);
    }

    (session, questions)
}

pub(super) fn submission(
    session_id: SessionId,
    question_id: QuestionId,
    audio: Option<&str>,
) -> AnswerSubmission {
    AnswerSubmission {
        session_id: Some(session_id),
        question_id: Some(question_id),
        audio: audio.map(|key| AudioRef(key.to_string())),
    }
}

pub(super) fn assessment(score: f64) -> AnswerAssessment {
    AnswerAssessment {
        transcript: "I paged the on-call, rolled back, then wrote the postmortem.".to_string(),
        ai_feedback: "Clear structure, light on metrics.".to_string(),
        score,
    }
}

/// Submits audio for `question` and returns the queued task.
pub(super) async fn queue_answer<S>(
    service: &AudioQueueService<S>,
    question: &GeneratedQuestion,
) -> AudioTask
where
    S: InterviewStore + 'static,
{
    let audio = format!("s3://answers/{}.webm", question.id);
    service
        .submit_answer(
            submission(question.session_id, question.id, Some(&audio)),
            "candidate",
        )
        .await
        .expect("answer submitted")
        .task
        .expect("task queued")
}

pub(super) fn router_with_service(
    service: AudioQueueService<MemoryInterviewStore>,
) -> axum::Router {
    interview_router(Arc::new(service))
}

pub(super) fn json_request(
    method: Method,
    uri: &str,
    role: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(role) = role {
        builder = builder.header(ROLE_HEADER, role);
    }
    let body = match body {
        Some(payload) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&payload).expect("serializable payload"))
        }
        None => Body::empty(),
    };
    builder.body(body).expect("request builds")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

fn offline() -> StoreError {
    StoreError::Unavailable("database offline".to_string())
}

pub(super) struct UnavailableStore;

#[async_trait]
impl InterviewStore for UnavailableStore {
    async fn create_session(&self, _session: NewSession) -> Result<InterviewSession, StoreError> {
        Err(offline())
    }

    async fn fetch_session(&self, _id: SessionId) -> Result<Option<InterviewSession>, StoreError> {
        Err(offline())
    }

    async fn add_question(
        &self,
        _session_id: SessionId,
        _question: NewQuestion,
        _at: DateTime<Utc>,
    ) -> Result<GeneratedQuestion, StoreError> {
        Err(offline())
    }

    async fn fetch_question(
        &self,
        _id: QuestionId,
    ) -> Result<Option<GeneratedQuestion>, StoreError> {
        Err(offline())
    }

    async fn session_questions(
        &self,
        _session_id: SessionId,
    ) -> Result<Vec<GeneratedQuestion>, StoreError> {
        Err(offline())
    }

    async fn session_answers(
        &self,
        _session_id: SessionId,
    ) -> Result<Vec<CandidateAnswer>, StoreError> {
        Err(offline())
    }

    async fn fetch_answer(&self, _id: AnswerId) -> Result<Option<CandidateAnswer>, StoreError> {
        Err(offline())
    }

    async fn insert_answer(
        &self,
        _answer: NewAnswer,
        _actor: &str,
        _at: DateTime<Utc>,
    ) -> Result<(CandidateAnswer, Option<AudioTask>), StoreError> {
        Err(offline())
    }

    async fn fetch_task(&self, _id: TaskId) -> Result<Option<AudioTask>, StoreError> {
        Err(offline())
    }

    async fn pending_tasks(&self) -> Result<Vec<AudioTask>, StoreError> {
        Err(offline())
    }

    async fn stale_tasks(
        &self,
        _claimed_before: DateTime<Utc>,
    ) -> Result<Vec<AudioTask>, StoreError> {
        Err(offline())
    }

    async fn task_events(&self, _id: TaskId) -> Result<Vec<TaskEvent>, StoreError> {
        Err(offline())
    }

    async fn claim_task(
        &self,
        _id: TaskId,
        _actor: &str,
        _at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        Err(offline())
    }

    async fn complete_task(
        &self,
        _id: TaskId,
        _assessment: &AnswerAssessment,
        _actor: &str,
        _at: DateTime<Utc>,
    ) -> Result<(AudioTask, CandidateAnswer), StoreError> {
        Err(offline())
    }

    async fn fail_task(
        &self,
        _id: TaskId,
        _reason: &str,
        _actor: &str,
        _at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        Err(offline())
    }

    async fn requeue_task(
        &self,
        _id: TaskId,
        _actor: &str,
        _at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        Err(offline())
    }

    async fn complete_session(
        &self,
        _id: SessionId,
        _at: DateTime<Utc>,
    ) -> Result<SessionCompletion, StoreError> {
        Err(offline())
    }

    async fn error_log(&self) -> Result<Vec<ErrorLogEntry>, StoreError> {
        Err(offline())
    }
}

/// Memory store whose session completion fails once `break_scoring` is set.
#[derive(Default)]
pub(super) struct ScoringOutageStore {
    pub(super) inner: MemoryInterviewStore,
    pub(super) broken: std::sync::atomic::AtomicBool,
}

impl ScoringOutageStore {
    pub(super) fn break_scoring(&self) {
        self.broken
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_broken(&self) -> bool {
        self.broken.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl InterviewStore for ScoringOutageStore {
    async fn create_session(&self, session: NewSession) -> Result<InterviewSession, StoreError> {
        self.inner.create_session(session).await
    }

    async fn fetch_session(&self, id: SessionId) -> Result<Option<InterviewSession>, StoreError> {
        self.inner.fetch_session(id).await
    }

    async fn add_question(
        &self,
        session_id: SessionId,
        question: NewQuestion,
        at: DateTime<Utc>,
    ) -> Result<GeneratedQuestion, StoreError> {
        self.inner.add_question(session_id, question, at).await
    }

    async fn fetch_question(
        &self,
        id: QuestionId,
    ) -> Result<Option<GeneratedQuestion>, StoreError> {
        self.inner.fetch_question(id).await
    }

    async fn session_questions(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<GeneratedQuestion>, StoreError> {
        self.inner.session_questions(session_id).await
    }

    async fn session_answers(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<CandidateAnswer>, StoreError> {
        self.inner.session_answers(session_id).await
    }

    async fn fetch_answer(&self, id: AnswerId) -> Result<Option<CandidateAnswer>, StoreError> {
        self.inner.fetch_answer(id).await
    }

    async fn insert_answer(
        &self,
        answer: NewAnswer,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(CandidateAnswer, Option<AudioTask>), StoreError> {
        self.inner.insert_answer(answer, actor, at).await
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Option<AudioTask>, StoreError> {
        self.inner.fetch_task(id).await
    }

    async fn pending_tasks(&self) -> Result<Vec<AudioTask>, StoreError> {
        self.inner.pending_tasks().await
    }

    async fn stale_tasks(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<AudioTask>, StoreError> {
        self.inner.stale_tasks(claimed_before).await
    }

    async fn task_events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError> {
        self.inner.task_events(id).await
    }

    async fn claim_task(
        &self,
        id: TaskId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        self.inner.claim_task(id, actor, at).await
    }

    async fn complete_task(
        &self,
        id: TaskId,
        assessment: &AnswerAssessment,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(AudioTask, CandidateAnswer), StoreError> {
        self.inner.complete_task(id, assessment, actor, at).await
    }

    async fn fail_task(
        &self,
        id: TaskId,
        reason: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        self.inner.fail_task(id, reason, actor, at).await
    }

    async fn requeue_task(
        &self,
        id: TaskId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        self.inner.requeue_task(id, actor, at).await
    }

    async fn complete_session(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<SessionCompletion, StoreError> {
        if self.is_broken() {
            return Err(offline());
        }
        self.inner.complete_session(id, at).await
    }

    async fn error_log(&self) -> Result<Vec<ErrorLogEntry>, StoreError> {
        self.inner.error_log().await
    }
}

/// Memory store that lets another writer slip in between the service's reads and its writes.
///
/// `stale_sessions` makes `fetch_session` report completed sessions as ongoing, as a read taken
/// just before the completion landed would. `slip_in_question` adds a question right before the
/// next session completion runs.
#[derive(Default)]
pub(super) struct InterleavingStore {
    pub(super) inner: MemoryInterviewStore,
    stale_sessions: std::sync::atomic::AtomicBool,
    late_question: std::sync::Mutex<Option<NewQuestion>>,
}

impl InterleavingStore {
    pub(super) fn serve_stale_sessions(&self) {
        self.stale_sessions
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub(super) fn slip_in_question(&self, question: NewQuestion) {
        *self.late_question.lock().expect("late question lock") = Some(question);
    }
}

#[async_trait]
impl InterviewStore for InterleavingStore {
    async fn create_session(&self, session: NewSession) -> Result<InterviewSession, StoreError> {
        self.inner.create_session(session).await
    }

    async fn fetch_session(&self, id: SessionId) -> Result<Option<InterviewSession>, StoreError> {
        let session = self.inner.fetch_session(id).await?;
        if !self.stale_sessions.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(session);
        }
        Ok(session.map(|mut session| {
            session.status = SessionStatus::Ongoing;
            session.total_score = None;
            session.ended_at = None;
            session
        }))
    }

    async fn add_question(
        &self,
        session_id: SessionId,
        question: NewQuestion,
        at: DateTime<Utc>,
    ) -> Result<GeneratedQuestion, StoreError> {
        self.inner.add_question(session_id, question, at).await
    }

    async fn fetch_question(
        &self,
        id: QuestionId,
    ) -> Result<Option<GeneratedQuestion>, StoreError> {
        self.inner.fetch_question(id).await
    }

    async fn session_questions(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<GeneratedQuestion>, StoreError> {
        self.inner.session_questions(session_id).await
    }

    async fn session_answers(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<CandidateAnswer>, StoreError> {
        self.inner.session_answers(session_id).await
    }

    async fn fetch_answer(&self, id: AnswerId) -> Result<Option<CandidateAnswer>, StoreError> {
        self.inner.fetch_answer(id).await
    }

    async fn insert_answer(
        &self,
        answer: NewAnswer,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(CandidateAnswer, Option<AudioTask>), StoreError> {
        self.inner.insert_answer(answer, actor, at).await
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Option<AudioTask>, StoreError> {
        self.inner.fetch_task(id).await
    }

    async fn pending_tasks(&self) -> Result<Vec<AudioTask>, StoreError> {
        self.inner.pending_tasks().await
    }

    async fn stale_tasks(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<AudioTask>, StoreError> {
        self.inner.stale_tasks(claimed_before).await
    }

    async fn task_events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError> {
        self.inner.task_events(id).await
    }

    async fn claim_task(
        &self,
        id: TaskId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        self.inner.claim_task(id, actor, at).await
    }

    async fn complete_task(
        &self,
        id: TaskId,
        assessment: &AnswerAssessment,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(AudioTask, CandidateAnswer), StoreError> {
        self.inner.complete_task(id, assessment, actor, at).await
    }

    async fn fail_task(
        &self,
        id: TaskId,
        reason: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        self.inner.fail_task(id, reason, actor, at).await
    }

    async fn requeue_task(
        &self,
        id: TaskId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        self.inner.requeue_task(id, actor, at).await
    }

    async fn complete_session(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<SessionCompletion, StoreError> {
        let late = self
            .late_question
            .lock()
            .map_err(|_| offline())?
            .take();
        if let Some(question) = late {
            self.inner.add_question(id, question, at).await?;
        }
        self.inner.complete_session(id, at).await
    }

    async fn error_log(&self) -> Result<Vec<ErrorLogEntry>, StoreError> {
        self.inner.error_log().await
    }
}
