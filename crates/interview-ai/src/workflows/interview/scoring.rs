use std::collections::BTreeMap;

use serde::Serialize;

use super::domain::{CandidateAnswer, GeneratedQuestion, QuestionId};

/// Result of rolling answer scores into a session total.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScoreOutcome {
    Incomplete { scored: usize, total: usize },
    Completed { total_score: f64 },
    AlreadyCompleted { total_score: Option<f64> },
    /// The completion committed but the session total could not be refreshed.
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tally {
    Incomplete { scored: usize, total: usize },
    Ready { total_score: f64 },
}

/// Weighted mean of the latest scored answer per question.
///
/// `answers` must be ordered oldest first. A session without questions never becomes ready.
pub(crate) fn tally(questions: &[GeneratedQuestion], answers: &[CandidateAnswer]) -> Tally {
    let mut latest: BTreeMap<QuestionId, f64> = BTreeMap::new();
    for answer in answers {
        if let Some(score) = answer.score {
            latest.insert(answer.question_id, score);
        }
    }

    let scored = questions
        .iter()
        .filter(|question| latest.contains_key(&question.id))
        .count();
    if questions.is_empty() || scored < questions.len() {
        return Tally::Incomplete {
            scored,
            total: questions.len(),
        };
    }

    let (weighted, weights) = questions.iter().fold((0.0, 0.0), |(sum, weights), question| {
        let score = latest.get(&question.id).copied().unwrap_or_default();
        (sum + score * question.weightage, weights + question.weightage)
    });

    Tally::Ready {
        total_score: weighted / weights,
    }
}
