use super::common::start;
use chrono::Duration;

use crate::workflows::interview::domain::{
    AnswerId, CandidateAnswer, GeneratedQuestion, QuestionId, SessionId,
};
use crate::workflows::interview::scoring::{tally, Tally};

fn question(id: i64, weightage: f64) -> GeneratedQuestion {
    GeneratedQuestion {
        id: QuestionId(id),
        session_id: SessionId(1),
        question_text: format!("question {id}"),
        expected_answer: None,
        weightage,
        created_at: start(),
    }
}

fn answer(id: i64, question: i64, score: Option<f64>, minute: i64) -> CandidateAnswer {
    CandidateAnswer {
        id: AnswerId(id),
        session_id: SessionId(1),
        question_id: QuestionId(question),
        audio: None,
        transcript: score.map(|_| "transcript".to_string()),
        ai_feedback: None,
        score,
        created_at: start() + Duration::minutes(minute),
    }
}

#[test]
fn weighted_mean_uses_question_weightage() {
    let questions = [question(1, 2.0), question(2, 1.0)];
    let answers = [answer(10, 1, Some(8.0), 0), answer(11, 2, Some(5.0), 1)];

    assert_eq!(tally(&questions, &answers), Tally::Ready { total_score: 7.0 });
}

#[test]
fn unscored_questions_keep_the_session_incomplete() {
    let questions = [question(1, 1.0), question(2, 1.0), question(3, 1.0)];
    let answers = [
        answer(10, 1, Some(6.0), 0),
        answer(11, 2, None, 1),
        answer(12, 2, None, 2),
    ];

    assert_eq!(
        tally(&questions, &answers),
        Tally::Incomplete {
            scored: 1,
            total: 3
        }
    );
}

#[test]
fn later_scored_answer_replaces_earlier_one() {
    let questions = [question(1, 1.0)];
    let answers = [
        answer(10, 1, Some(3.0), 0),
        answer(11, 1, Some(9.0), 5),
        answer(12, 1, None, 9),
    ];

    assert_eq!(tally(&questions, &answers), Tally::Ready { total_score: 9.0 });
}

#[test]
fn session_without_questions_never_completes() {
    assert_eq!(
        tally(&[], &[answer(10, 1, Some(10.0), 0)]),
        Tally::Incomplete {
            scored: 0,
            total: 0
        }
    );
}
