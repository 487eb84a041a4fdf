//! Audio answer processing queue: answer intake, worker dispatch, completion and session scoring.
//!
//! Task status lives in the [`InterviewStore`]; workers coordinate only through its
//! compare-and-swap transitions.

pub mod domain;
pub mod memory;
pub mod router;
pub(crate) mod scoring;
pub mod service;
pub mod sqlite;
pub mod store;

#[cfg(test)]
mod tests;

pub use domain::{
    AnswerAssessment, AnswerId, AnswerSubmission, AudioRef, AudioTask, CandidateAnswer,
    ErrorLogEntry, GeneratedQuestion, InterviewSession, NewAnswer, NewQuestion, NewSession,
    QuestionId, SessionId, SessionStatus, TaskEvent, TaskEventKind, TaskId, TaskStatus,
};
pub use memory::MemoryInterviewStore;
pub use router::interview_router;
pub use scoring::ScoreOutcome;
pub use service::{
    AudioQueueService, CompletedTask, QueueServiceError, SubmittedAnswer, TaskDetail,
    STALE_TASK_REASON,
};
pub use sqlite::SqliteInterviewStore;
pub use store::{InterviewStore, SessionCompletion, StoreError};
