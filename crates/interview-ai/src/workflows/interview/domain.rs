use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

record_id!(
    /// Identifier of an interview session owned by the scheduling collaborator.
    SessionId,
    "session"
);
record_id!(
    /// Identifier of an AI generated question attached to a session.
    QuestionId,
    "question"
);
record_id!(
    /// Identifier of a submitted candidate answer.
    AnswerId,
    "answer"
);
record_id!(
    /// Identifier of an audio processing task.
    TaskId,
    "task"
);

/// Opaque handle to an uploaded audio blob (object key or URI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioRef(pub String);

impl AudioRef {
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// Processing status of an [`AudioTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Done,
        TaskStatus::Failed,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "done" => Some(TaskStatus::Done),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Edges of the task state machine. `Failed -> Pending` is the operator requeue.
    pub const fn permits(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Done)
                | (TaskStatus::Processing, TaskStatus::Failed)
                | (TaskStatus::Failed, TaskStatus::Pending)
        )
    }

    /// The status a task must hold to move to `self`. Every target has exactly one.
    pub fn source(self) -> Option<TaskStatus> {
        Self::ALL.into_iter().find(|from| from.permits(self))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Work order for transcribing and scoring one spoken answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTask {
    pub id: TaskId,
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub answer_id: AnswerId,
    pub audio: AudioRef,
    pub status: TaskStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub requeue_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Answer captured for a generated question. Scoring fields stay empty until a worker reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAnswer {
    pub id: AnswerId,
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub audio: Option<AudioRef>,
    pub transcript: Option<String>,
    pub ai_feedback: Option<String>,
    pub score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl CandidateAnswer {
    pub fn is_scored(&self) -> bool {
        self.transcript.is_some() || self.ai_feedback.is_some() || self.score.is_some()
    }
}

/// Lifecycle of an interview session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Ongoing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Ongoing => "ongoing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(SessionStatus::Created),
            "ongoing" => Some(SessionStatus::Ongoing),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewSession {
    pub id: SessionId,
    pub candidate_id: i64,
    pub job_id: i64,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_score: Option<f64>,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub id: QuestionId,
    pub session_id: SessionId,
    pub question_text: String,
    pub expected_answer: Option<String>,
    pub weightage: f64,
    pub created_at: DateTime<Utc>,
}

/// Session registration handed to the store by the scheduling collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub candidate_id: i64,
    pub job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuestion {
    pub question_text: String,
    #[serde(default)]
    pub expected_answer: Option<String>,
    #[serde(default = "default_weightage")]
    pub weightage: f64,
}

fn default_weightage() -> f64 {
    1.0
}

/// Raw answer submission. Field presence is validated by the producer, not serde.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub question_id: Option<QuestionId>,
    #[serde(default)]
    pub audio: Option<AudioRef>,
}

/// Validated answer ready to be written together with its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnswer {
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub audio: Option<AudioRef>,
}

/// Worker supplied result for a processed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerAssessment {
    pub transcript: String,
    pub ai_feedback: String,
    pub score: f64,
}

/// Kind of audit entry written alongside each task transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Created,
    Claimed,
    Completed,
    Failed,
    Requeued,
}

impl TaskEventKind {
    pub const fn label(self) -> &'static str {
        match self {
            TaskEventKind::Created => "created",
            TaskEventKind::Claimed => "claimed",
            TaskEventKind::Completed => "completed",
            TaskEventKind::Failed => "failed",
            TaskEventKind::Requeued => "requeued",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(TaskEventKind::Created),
            "claimed" => Some(TaskEventKind::Claimed),
            "completed" => Some(TaskEventKind::Completed),
            "failed" => Some(TaskEventKind::Failed),
            "requeued" => Some(TaskEventKind::Requeued),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskEventKind,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Entry in the error log consumed by operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub event_type: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}
