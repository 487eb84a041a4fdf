use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use super::domain::{
    AnswerAssessment, AnswerId, AudioRef, AudioTask, CandidateAnswer, ErrorLogEntry,
    GeneratedQuestion, InterviewSession, NewAnswer, NewQuestion, NewSession, QuestionId,
    SessionId, SessionStatus, TaskEvent, TaskEventKind, TaskId, TaskStatus,
};
use super::scoring::{tally, Tally};
use super::store::{InterviewStore, SessionCompletion, StoreError, TASK_ERROR_EVENT};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

macro_rules! task_columns {
    () => {
        "id, session_id, question_id, answer_id, audio_ref, task_status, claimed_at, \
         failure_reason, requeue_count, created_at, updated_at"
    };
}

macro_rules! answer_columns {
    () => {
        "id, session_id, question_id, audio_ref, transcript, ai_feedback, score, created_at"
    };
}

macro_rules! session_columns {
    () => {
        "id, candidate_id, job_id, session_status, started_at, ended_at, total_score, feedback"
    };
}

macro_rules! question_columns {
    () => {
        "id, session_id, question_text, expected_answer, weightage, created_at"
    };
}

const SCHEMA: [&str; 7] = [
    r#"
    CREATE TABLE IF NOT EXISTS interview_sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        candidate_id INTEGER NOT NULL,
        job_id INTEGER NOT NULL,
        session_status TEXT NOT NULL DEFAULT 'created',
        started_at TEXT,
        ended_at TEXT,
        total_score REAL,
        feedback TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS generated_questions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL REFERENCES interview_sessions(id),
        question_text TEXT NOT NULL,
        expected_answer TEXT,
        weightage REAL NOT NULL DEFAULT 1.0,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS candidate_answers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL REFERENCES interview_sessions(id),
        question_id INTEGER NOT NULL REFERENCES generated_questions(id),
        audio_ref TEXT,
        transcript TEXT,
        ai_feedback TEXT,
        score REAL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audio_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL REFERENCES interview_sessions(id),
        question_id INTEGER NOT NULL REFERENCES generated_questions(id),
        answer_id INTEGER NOT NULL UNIQUE REFERENCES candidate_answers(id),
        audio_ref TEXT NOT NULL,
        task_status TEXT NOT NULL DEFAULT 'pending',
        claimed_at TEXT,
        failure_reason TEXT,
        requeue_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_audio_tasks_status ON audio_tasks (task_status, created_at, id)",
    r#"
    CREATE TABLE IF NOT EXISTS task_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL REFERENCES audio_tasks(id),
        kind TEXT NOT NULL,
        actor TEXT NOT NULL,
        detail TEXT,
        at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS error_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        detail TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
];

/// Durable store backed by SQLite. Status transitions are conditional `UPDATE ... RETURNING`
/// statements, so the precondition check and the write happen in one statement.
#[derive(Clone)]
pub struct SqliteInterviewStore {
    pool: SqlitePool,
}

impl SqliteInterviewStore {
    /// Opens (creating if missing) the database at `url` and applies the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `sqlite::memory:` is a separate database.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(
                    options
                        .journal_mode(SqliteJournalMode::Wal)
                        .busy_timeout(BUSY_TIMEOUT),
                )
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Takes the write lock at `BEGIN`. A deferred transaction that reads before writing
    /// gets `SQLITE_BUSY` on the upgrade instead of waiting out the busy timeout.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("interview schema ready");
        Ok(())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Unavailable(value.to_string())
    }
}

fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| StoreError::Unavailable(format!("corrupt timestamp '{raw}': {err}")))
}

fn decode_optional_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(decode_time).transpose()
}

fn task_from_row(row: &SqliteRow) -> Result<AudioTask, StoreError> {
    let status: String = row.try_get("task_status")?;
    let status = TaskStatus::parse(&status)
        .ok_or_else(|| StoreError::Unavailable(format!("unknown task status '{status}'")))?;
    let requeue_count: i64 = row.try_get("requeue_count")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(AudioTask {
        id: TaskId(row.try_get("id")?),
        session_id: SessionId(row.try_get("session_id")?),
        question_id: QuestionId(row.try_get("question_id")?),
        answer_id: AnswerId(row.try_get("answer_id")?),
        audio: AudioRef(row.try_get("audio_ref")?),
        status,
        claimed_at: decode_optional_time(row.try_get("claimed_at")?)?,
        failure_reason: row.try_get("failure_reason")?,
        requeue_count: u32::try_from(requeue_count).unwrap_or(u32::MAX),
        created_at: decode_time(&created_at)?,
        updated_at: decode_time(&updated_at)?,
    })
}

fn answer_from_row(row: &SqliteRow) -> Result<CandidateAnswer, StoreError> {
    let audio: Option<String> = row.try_get("audio_ref")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(CandidateAnswer {
        id: AnswerId(row.try_get("id")?),
        session_id: SessionId(row.try_get("session_id")?),
        question_id: QuestionId(row.try_get("question_id")?),
        audio: audio.map(AudioRef),
        transcript: row.try_get("transcript")?,
        ai_feedback: row.try_get("ai_feedback")?,
        score: row.try_get("score")?,
        created_at: decode_time(&created_at)?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<InterviewSession, StoreError> {
    let status: String = row.try_get("session_status")?;
    let status = SessionStatus::parse(&status)
        .ok_or_else(|| StoreError::Unavailable(format!("unknown session status '{status}'")))?;

    Ok(InterviewSession {
        id: SessionId(row.try_get("id")?),
        candidate_id: row.try_get("candidate_id")?,
        job_id: row.try_get("job_id")?,
        status,
        started_at: decode_optional_time(row.try_get("started_at")?)?,
        ended_at: decode_optional_time(row.try_get("ended_at")?)?,
        total_score: row.try_get("total_score")?,
        feedback: row.try_get("feedback")?,
    })
}

fn question_from_row(row: &SqliteRow) -> Result<GeneratedQuestion, StoreError> {
    let created_at: String = row.try_get("created_at")?;

    Ok(GeneratedQuestion {
        id: QuestionId(row.try_get("id")?),
        session_id: SessionId(row.try_get("session_id")?),
        question_text: row.try_get("question_text")?,
        expected_answer: row.try_get("expected_answer")?,
        weightage: row.try_get("weightage")?,
        created_at: decode_time(&created_at)?,
    })
}

async fn record_event(
    conn: &mut SqliteConnection,
    task_id: TaskId,
    kind: TaskEventKind,
    actor: &str,
    detail: Option<&str>,
    at: &str,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO task_events (task_id, kind, actor, detail, at) VALUES (?, ?, ?, ?, ?)")
        .bind(task_id.0)
        .bind(kind.label())
        .bind(actor)
        .bind(detail)
        .bind(at)
        .execute(conn)
        .await?;
    Ok(())
}

/// Status label a task must hold for the conditional update that moves it to `to`.
fn source_label(to: TaskStatus) -> Result<&'static str, StoreError> {
    to.source()
        .map(TaskStatus::label)
        .ok_or_else(|| StoreError::Unavailable(format!("no transition leads to {to}")))
}

/// Fails unless the session exists and is still open.
async fn require_open_session(conn: &mut SqliteConnection, id: SessionId) -> Result<(), StoreError> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT session_status FROM interview_sessions WHERE id = ?")
            .bind(id.0)
            .fetch_optional(conn)
            .await?;
    let Some(raw) = status else {
        return Err(StoreError::NotFound);
    };
    match SessionStatus::parse(&raw) {
        Some(SessionStatus::Completed) => Err(StoreError::SessionCompleted),
        Some(_) => Ok(()),
        None => Err(StoreError::Unavailable(format!("unknown session status '{raw}'"))),
    }
}

/// Explains why a conditional task update matched no row.
async fn transition_refused(conn: &mut SqliteConnection, id: TaskId) -> StoreError {
    let current: Result<Option<String>, sqlx::Error> =
        sqlx::query_scalar("SELECT task_status FROM audio_tasks WHERE id = ?")
            .bind(id.0)
            .fetch_optional(conn)
            .await;

    match current {
        Ok(Some(raw)) => match TaskStatus::parse(&raw) {
            Some(current) => StoreError::StatusMismatch { current },
            None => StoreError::Unavailable(format!("unknown task status '{raw}'")),
        },
        Ok(None) => StoreError::NotFound,
        Err(err) => err.into(),
    }
}

#[async_trait]
impl InterviewStore for SqliteInterviewStore {
    async fn create_session(&self, session: NewSession) -> Result<InterviewSession, StoreError> {
        let row = sqlx::query(concat!(
            "INSERT INTO interview_sessions (candidate_id, job_id) VALUES (?, ?) RETURNING ",
            session_columns!()
        ))
        .bind(session.candidate_id)
        .bind(session.job_id)
        .fetch_one(&self.pool)
        .await?;
        session_from_row(&row)
    }

    async fn fetch_session(&self, id: SessionId) -> Result<Option<InterviewSession>, StoreError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            session_columns!(),
            " FROM interview_sessions WHERE id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn add_question(
        &self,
        session_id: SessionId,
        question: NewQuestion,
        at: DateTime<Utc>,
    ) -> Result<GeneratedQuestion, StoreError> {
        let mut tx = self.begin_write().await?;
        require_open_session(&mut tx, session_id).await?;

        let row = sqlx::query(concat!(
            "INSERT INTO generated_questions \
             (session_id, question_text, expected_answer, weightage, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING ",
            question_columns!()
        ))
        .bind(session_id.0)
        .bind(&question.question_text)
        .bind(question.expected_answer.as_deref())
        .bind(question.weightage)
        .bind(encode_time(at))
        .fetch_one(&mut *tx)
        .await?;
        let stored = question_from_row(&row)?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn fetch_question(
        &self,
        id: QuestionId,
    ) -> Result<Option<GeneratedQuestion>, StoreError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            question_columns!(),
            " FROM generated_questions WHERE id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(question_from_row).transpose()
    }

    async fn session_questions(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<GeneratedQuestion>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            question_columns!(),
            " FROM generated_questions WHERE session_id = ? ORDER BY id"
        ))
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(question_from_row).collect()
    }

    async fn session_answers(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<CandidateAnswer>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            answer_columns!(),
            " FROM candidate_answers WHERE session_id = ? ORDER BY created_at, id"
        ))
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(answer_from_row).collect()
    }

    async fn fetch_answer(&self, id: AnswerId) -> Result<Option<CandidateAnswer>, StoreError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            answer_columns!(),
            " FROM candidate_answers WHERE id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(answer_from_row).transpose()
    }

    async fn insert_answer(
        &self,
        answer: NewAnswer,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(CandidateAnswer, Option<AudioTask>), StoreError> {
        let stamp = encode_time(at);
        let mut tx = self.begin_write().await?;

        require_open_session(&mut tx, answer.session_id).await?;
        let owner: Option<i64> =
            sqlx::query_scalar("SELECT session_id FROM generated_questions WHERE id = ?")
                .bind(answer.question_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        match owner {
            None => return Err(StoreError::NotFound),
            Some(owner) if owner != answer.session_id.0 => return Err(StoreError::SessionMismatch),
            Some(_) => {}
        }

        let row = sqlx::query(concat!(
            "INSERT INTO candidate_answers (session_id, question_id, audio_ref, created_at) \
             VALUES (?, ?, ?, ?) RETURNING ",
            answer_columns!()
        ))
        .bind(answer.session_id.0)
        .bind(answer.question_id.0)
        .bind(answer.audio.as_ref().map(|audio| audio.0.clone()))
        .bind(&stamp)
        .fetch_one(&mut *tx)
        .await?;
        let stored = answer_from_row(&row)?;

        let task = match &answer.audio {
            Some(audio) => {
                let row = sqlx::query(concat!(
                    "INSERT INTO audio_tasks \
                     (session_id, question_id, answer_id, audio_ref, task_status, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, 'pending', ?, ?) RETURNING ",
                    task_columns!()
                ))
                .bind(answer.session_id.0)
                .bind(answer.question_id.0)
                .bind(stored.id.0)
                .bind(&audio.0)
                .bind(&stamp)
                .bind(&stamp)
                .fetch_one(&mut *tx)
                .await?;
                let task = task_from_row(&row)?;
                record_event(&mut tx, task.id, TaskEventKind::Created, actor, None, &stamp).await?;
                Some(task)
            }
            None => None,
        };

        sqlx::query(
            "UPDATE interview_sessions SET session_status = 'ongoing', started_at = ? \
             WHERE id = ? AND session_status = 'created'",
        )
        .bind(&stamp)
        .bind(answer.session_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((stored, task))
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Option<AudioTask>, StoreError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            task_columns!(),
            " FROM audio_tasks WHERE id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn pending_tasks(&self) -> Result<Vec<AudioTask>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            task_columns!(),
            " FROM audio_tasks WHERE task_status = 'pending' ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn stale_tasks(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<AudioTask>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            task_columns!(),
            " FROM audio_tasks WHERE task_status = 'processing' AND claimed_at < ? \
             ORDER BY claimed_at, id"
        ))
        .bind(encode_time(claimed_before))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn task_events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT task_id, kind, actor, detail, at FROM task_events WHERE task_id = ? ORDER BY id",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("kind")?;
                let at: String = row.try_get("at")?;
                Ok(TaskEvent {
                    task_id: TaskId(row.try_get("task_id")?),
                    kind: TaskEventKind::parse(&kind).ok_or_else(|| {
                        StoreError::Unavailable(format!("unknown task event '{kind}'"))
                    })?,
                    actor: row.try_get("actor")?,
                    detail: row.try_get("detail")?,
                    at: decode_time(&at)?,
                })
            })
            .collect()
    }

    async fn claim_task(
        &self,
        id: TaskId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        let stamp = encode_time(at);
        let mut tx = self.begin_write().await?;
        let row = sqlx::query(concat!(
            "UPDATE audio_tasks SET task_status = 'processing', claimed_at = ?, updated_at = ? \
             WHERE id = ? AND task_status = ? RETURNING ",
            task_columns!()
        ))
        .bind(&stamp)
        .bind(&stamp)
        .bind(id.0)
        .bind(source_label(TaskStatus::Processing)?)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(transition_refused(&mut tx, id).await);
        };
        let task = task_from_row(&row)?;
        record_event(&mut tx, id, TaskEventKind::Claimed, actor, None, &stamp).await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn complete_task(
        &self,
        id: TaskId,
        assessment: &AnswerAssessment,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(AudioTask, CandidateAnswer), StoreError> {
        let stamp = encode_time(at);
        let mut tx = self.begin_write().await?;
        let row = sqlx::query(concat!(
            "UPDATE audio_tasks SET task_status = 'done', updated_at = ? \
             WHERE id = ? AND task_status = ? RETURNING ",
            task_columns!()
        ))
        .bind(&stamp)
        .bind(id.0)
        .bind(source_label(TaskStatus::Done)?)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(transition_refused(&mut tx, id).await);
        };
        let task = task_from_row(&row)?;

        let row = sqlx::query(concat!(
            "UPDATE candidate_answers SET transcript = ?, ai_feedback = ?, score = ? \
             WHERE id = ? AND transcript IS NULL AND ai_feedback IS NULL AND score IS NULL \
             RETURNING ",
            answer_columns!()
        ))
        .bind(&assessment.transcript)
        .bind(&assessment.ai_feedback)
        .bind(assessment.score)
        .bind(task.answer_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Dropping the transaction rolls back the task update.
            return Err(StoreError::AnswerAlreadyScored);
        };
        let answer = answer_from_row(&row)?;

        record_event(&mut tx, id, TaskEventKind::Completed, actor, None, &stamp).await?;
        tx.commit().await?;
        Ok((task, answer))
    }

    async fn fail_task(
        &self,
        id: TaskId,
        reason: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        let stamp = encode_time(at);
        let mut tx = self.begin_write().await?;
        let row = sqlx::query(concat!(
            "UPDATE audio_tasks SET task_status = 'failed', failure_reason = ?, updated_at = ? \
             WHERE id = ? AND task_status = ? RETURNING ",
            task_columns!()
        ))
        .bind(reason)
        .bind(&stamp)
        .bind(id.0)
        .bind(source_label(TaskStatus::Failed)?)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(transition_refused(&mut tx, id).await);
        };
        let task = task_from_row(&row)?;

        record_event(&mut tx, id, TaskEventKind::Failed, actor, Some(reason), &stamp).await?;
        sqlx::query("INSERT INTO error_logs (event_type, detail, created_at) VALUES (?, ?, ?)")
            .bind(TASK_ERROR_EVENT)
            .bind(format!("{id}: {reason}"))
            .bind(&stamp)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn requeue_task(
        &self,
        id: TaskId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<AudioTask, StoreError> {
        let stamp = encode_time(at);
        let mut tx = self.begin_write().await?;
        let row = sqlx::query(concat!(
            "UPDATE audio_tasks SET task_status = 'pending', claimed_at = NULL, \
             failure_reason = NULL, requeue_count = requeue_count + 1, updated_at = ? \
             WHERE id = ? AND task_status = ? RETURNING ",
            task_columns!()
        ))
        .bind(&stamp)
        .bind(id.0)
        .bind(source_label(TaskStatus::Pending)?)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(transition_refused(&mut tx, id).await);
        };
        let task = task_from_row(&row)?;
        record_event(&mut tx, id, TaskEventKind::Requeued, actor, None, &stamp).await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn complete_session(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<SessionCompletion, StoreError> {
        let mut tx = self.begin_write().await?;
        let row = sqlx::query(concat!(
            "SELECT ",
            session_columns!(),
            " FROM interview_sessions WHERE id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;
        let session = session_from_row(&row)?;
        if session.status == SessionStatus::Completed {
            return Ok(SessionCompletion::AlreadyCompleted(session));
        }

        let questions = sqlx::query(concat!(
            "SELECT ",
            question_columns!(),
            " FROM generated_questions WHERE session_id = ? ORDER BY id"
        ))
        .bind(id.0)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(question_from_row)
        .collect::<Result<Vec<_>, _>>()?;
        let answers = sqlx::query(concat!(
            "SELECT ",
            answer_columns!(),
            " FROM candidate_answers WHERE session_id = ? ORDER BY created_at, id"
        ))
        .bind(id.0)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(answer_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let total_score = match tally(&questions, &answers) {
            Tally::Incomplete { scored, total } => {
                return Ok(SessionCompletion::Incomplete { scored, total })
            }
            Tally::Ready { total_score } => total_score,
        };

        let row = sqlx::query(concat!(
            "UPDATE interview_sessions \
             SET session_status = 'completed', total_score = ?, ended_at = ? \
             WHERE id = ? AND session_status <> 'completed' RETURNING ",
            session_columns!()
        ))
        .bind(total_score)
        .bind(encode_time(at))
        .bind(id.0)
        .fetch_one(&mut *tx)
        .await?;
        let completed = session_from_row(&row)?;
        tx.commit().await?;
        Ok(SessionCompletion::Completed(completed))
    }

    async fn error_log(&self) -> Result<Vec<ErrorLogEntry>, StoreError> {
        let rows = sqlx::query("SELECT event_type, detail, created_at FROM error_logs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let created_at: String = row.try_get("created_at")?;
                Ok(ErrorLogEntry {
                    event_type: row.try_get("event_type")?,
                    detail: row.try_get("detail")?,
                    created_at: decode_time(&created_at)?,
                })
            })
            .collect()
    }
}
