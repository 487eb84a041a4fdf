use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::domain::{
    AnswerAssessment, AnswerId, AudioTask, CandidateAnswer, ErrorLogEntry, GeneratedQuestion,
    InterviewSession, NewAnswer, NewQuestion, NewSession, QuestionId, SessionId, SessionStatus,
    TaskEvent, TaskEventKind, TaskId, TaskStatus,
};
use super::scoring::{tally, Tally};
use super::store::{InterviewStore, SessionCompletion, StoreError, TASK_ERROR_EVENT};

/// Process-local store. Every operation runs inside one critical section, so each status
/// transition is an indivisible check-and-set.
#[derive(Default, Clone)]
pub struct MemoryInterviewStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    sessions: BTreeMap<SessionId, InterviewSession>,
    questions: BTreeMap<QuestionId, GeneratedQuestion>,
    answers: BTreeMap<AnswerId, CandidateAnswer>,
    tasks: BTreeMap<TaskId, AudioTask>,
    events: Vec<TaskEvent>,
    errors: Vec<ErrorLogEntry>,
    sequence: i64,
}

impl MemoryInterviewStore {
    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))
    }
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    fn record(
        &mut self,
        task_id: TaskId,
        kind: TaskEventKind,
        actor: &str,
        detail: Option<&str>,
        at: DateTime<Utc>,
    ) {
        self.events.push(TaskEvent {
            task_id,
            kind,
            actor: actor.to_string(),
            detail: detail.map(str::to_string),
            at,
        });
    }

    fn expect_transition(&self, id: TaskId, to: TaskStatus) -> Result<(), StoreError> {
        let task = self.tasks.get(&id).ok_or(StoreError::NotFound)?;
        if task.status.permits(to) {
            Ok(())
        } else {
            Err(StoreError::StatusMismatch {
                current: task.status,
            })
        }
    }

    fn open_session(&self, id: SessionId) -> Result<&InterviewSession, StoreError> {
        let session = self.sessions.get(&id).ok_or(StoreError::NotFound)?;
        if session.status == SessionStatus::Completed {
            return Err(StoreError::SessionCompleted);
        }
        Ok(session)
    }

    fn questions_of(&self, session_id: SessionId) -> Vec<GeneratedQuestion> {
        self.questions
            .values()
            .filter(|question| question.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Oldest first.
    fn answers_of(&self, session_id: SessionId) -> Vec<CandidateAnswer> {
        let mut answers: Vec<CandidateAnswer> = self
            .answers
            .values()
            .filter(|answer| answer.session_id == session_id)
            .cloned()
            .collect();
        answers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        answers
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut AudioTask, StoreError> {
        self.tasks.get_mut(&id).ok_or(StoreError::NotFound)
    }

    fn insert_answer(
        &mut self,
        answer: NewAnswer,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(CandidateAnswer, Option<AudioTask>), StoreError> {
        self.open_session(answer.session_id)?;
        match self.questions.get(&answer.question_id) {
            Some(question) if question.session_id == answer.session_id => {}
            Some(_) => return Err(StoreError::SessionMismatch),
            None => return Err(StoreError::NotFound),
        }

        let answer_id = AnswerId(self.next_id());
        let stored = CandidateAnswer {
            id: answer_id,
            session_id: answer.session_id,
            question_id: answer.question_id,
            audio: answer.audio.clone(),
            transcript: None,
            ai_feedback: None,
            score: None,
            created_at: at,
        };

        let task = answer.audio.map(|audio| AudioTask {
            id: TaskId(self.next_id()),
            session_id: answer.session_id,
            question_id: answer.question_id,
            answer_id,
            audio,
            status: TaskStatus::Pending,
            claimed_at: None,
            failure_reason: None,
            requeue_count: 0,
            created_at: at,
            updated_at: at,
        });

        if let Some(session) = self.sessions.get_mut(&answer.session_id) {
            if session.status == SessionStatus::Created {
                session.status = SessionStatus::Ongoing;
                session.started_at = Some(at);
            }
        }
        self.answers.insert(answer_id, stored.clone());
        if let Some(task) = &task {
            self.tasks.insert(task.id, task.clone());
            self.record(task.id, TaskEventKind::Created, actor, None, at);
        }

        Ok((stored, task))
    }

    fn complete_task(
        &mut self,
        id: TaskId,
        assessment: &AnswerAssessment,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(AudioTask, CandidateAnswer), StoreError> {
        self.expect_transition(id, TaskStatus::Done)?;
        let answer_id = self.task_mut(id)?.answer_id;
        let answer = self.answers.get(&answer_id).ok_or(StoreError::NotFound)?;
        if answer.is_scored() {
            return Err(StoreError::AnswerAlreadyScored);
        }

        let answer = self.answers.get_mut(&answer_id).ok_or(StoreError::NotFound)?;
        answer.transcript = Some(assessment.transcript.clone());
        answer.ai_feedback = Some(assessment.ai_feedback.clone());
        answer.score = Some(assessment.score);
        let answer = answer.clone();

        let task = self.task_mut(id)?;
        task.status = TaskStatus::Done;
        task.updated_at = at;
        let task = task.clone();

        self.record(id, TaskEventKind::Completed, actor, None, at);
        Ok((task, answer))
    }

    fn complete_session(
        &mut self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<SessionCompletion, StoreError> {
        match self.open_session(id) {
            Ok(_) => {}
            Err(StoreError::SessionCompleted) => {
                let session = self.sessions.get(&id).ok_or(StoreError::NotFound)?;
                return Ok(SessionCompletion::AlreadyCompleted(session.clone()));
            }
            Err(err) => return Err(err),
        }

        let total_score = match tally(&self.questions_of(id), &self.answers_of(id)) {
            Tally::Incomplete { scored, total } => {
                return Ok(SessionCompletion::Incomplete { scored, total })
            }
            Tally::Ready { total_score } => total_score,
        };

        let session = self.sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        session.status = SessionStatus::Completed;
        session.total_score = Some(total_score);
        session.ended_at = Some(at);
        Ok(SessionCompletion::Completed(session.clone()))
    }
}

#[async_trait]
impl InterviewStore for MemoryInterviewStore {
    async fn create_session(&self, session: NewSession) -> Result<InterviewSession, StoreError> {
        let mut state = self.state()?;
        let id = SessionId(state.next_id());
        let record = InterviewSession {
            id,
            candidate_id: session.candidate_id,
            job_id: session.job_id,
            status: SessionStatus::Created,
            started_at: None,
            ended_at: None,
            total_score: None,
            feedback: None,
        };
        state.sessions.insert(id, record.clone());
        Ok(record)
    }

    async fn fetch_session(&self, id: SessionId) -> Result<Option<InterviewSession>, StoreError> {
        Ok(self.state()?.sessions.get(&id).cloned())
    }

    async fn add_question(
        &self,
        session_id: SessionId,
        question: NewQuestion,
        at: DateTime<Utc>,
    ) -> Result<GeneratedQuestion, StoreError> {
        let mut state = self.state()?;
        state.open_session(session_id)?;
        let id = QuestionId(state.next_id());
        let record = GeneratedQuestion {
            id,
            session_id,
            question_text: question.question_text,
            expected_answer: question.expected_answer,
            weightage: question.weightage,
            created_at: at,
        };
        state.questions.insert(id, record.clone());
        Ok(record)
    }

    async fn fetch_question(
        &self,
        id: QuestionId,
    ) -> Result<Option<GeneratedQuestion>, StoreError> {
        Ok(self.state()?.questions.get(&id).cloned())
    }

    async fn session_questions(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<GeneratedQuestion>, StoreError> {
        Ok(self.state()?.questions_of(session_id))
    }

    async fn session_answers(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<CandidateAnswer>, StoreError> {
        Ok(self.state()?.answers_of(session_id))
    }

    async fn fetch_answer(&self, id: AnswerId) -> Result<Option<CandidateAnswer>, StoreError> {
        Ok(self.state()?.answers.get(&id).cloned())
    }

    async fn insert_answer(
        &self,
        answer: NewAnswer,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(CandidateAnswer, Option<AudioTask>), StoreError> {
        self.state()?.insert_answer(answer, actor, at)
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Option<AudioTask>, StoreError> {
        Ok(self.state()?.tasks.get(&id).cloned())
    }

    async fn pending_tasks(&self) -> Result<Vec<AudioTask>, StoreError> {
        let mut pending: Vec<AudioTask> = self
            .state()?
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(pending)
    }

    async fn stale_tasks(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<AudioTask>, StoreError> {
        let mut stale: Vec<AudioTask> = self
            .state()?
            .tasks
            .values()
            .filter(|task| {
                task.status == TaskStatus::Processing
                    && task.claimed_at.is_some_and(|claimed| claimed < claimed_before)
            })
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.claimed_at.cmp(&b.claimed_at).then(a.id.cmp(&b.id)));
        Ok(stale)
    }

    async fn task_events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError> {
        Ok(self
            .state()?
            .events
            .iter()
            .filter(|event| event.task_id == id)
            .cloned()
            .collect())
    }

    async fn claim_task(
        &self,
        id: TaskId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        let mut state = self.state()?;
        state.expect_transition(id, TaskStatus::Processing)?;
        let task = state.task_mut(id)?;
        task.status = TaskStatus::Processing;
        task.claimed_at = Some(at);
        task.updated_at = at;
        let task = task.clone();
        state.record(id, TaskEventKind::Claimed, actor, None, at);
        Ok(task)
    }

    async fn complete_task(
        &self,
        id: TaskId,
        assessment: &AnswerAssessment,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(AudioTask, CandidateAnswer), StoreError> {
        self.state()?.complete_task(id, assessment, actor, at)
    }

    async fn fail_task(
        &self,
        id: TaskId,
        reason: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        let mut state = self.state()?;
        state.expect_transition(id, TaskStatus::Failed)?;
        let task = state.task_mut(id)?;
        task.status = TaskStatus::Failed;
        task.failure_reason = Some(reason.to_string());
        task.updated_at = at;
        let task = task.clone();
        state.record(id, TaskEventKind::Failed, actor, Some(reason), at);
        state.errors.push(ErrorLogEntry {
            event_type: TASK_ERROR_EVENT.to_string(),
            detail: format!("{id}: {reason}"),
            created_at: at,
        });
        Ok(task)
    }

    async fn requeue_task(
        &self,
        id: TaskId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        let mut state = self.state()?;
        state.expect_transition(id, TaskStatus::Pending)?;
        let task = state.task_mut(id)?;
        task.status = TaskStatus::Pending;
        task.claimed_at = None;
        task.failure_reason = None;
        task.requeue_count += 1;
        task.updated_at = at;
        let task = task.clone();
        state.record(id, TaskEventKind::Requeued, actor, None, at);
        Ok(task)
    }

    async fn complete_session(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<SessionCompletion, StoreError> {
        self.state()?.complete_session(id, at)
    }

    async fn error_log(&self) -> Result<Vec<ErrorLogEntry>, StoreError> {
        Ok(self.state()?.errors.clone())
    }
}
