use crate::operator::render;
use clap::Args;
use interview_ai::config::QueueConfig;
use interview_ai::error::AppError;
use interview_ai::workflows::interview::{
    AnswerAssessment, AnswerSubmission, AudioQueueService, AudioRef, InterviewSession,
    MemoryInterviewStore, NewQuestion, NewSession, QuestionId, QueueServiceError, ScoreOutcome,
    SessionId, TaskId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of concurrent workers racing for tasks
    #[arg(long, default_value_t = 3)]
    pub(crate) workers: usize,
    /// Fail the first claimed task so the admin requeue path is exercised
    #[arg(long)]
    pub(crate) fail_first: bool,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            workers: 3,
            fail_first: false,
        }
    }
}

const QUESTIONS: [(&str, f64, f64); 3] = [
    ("Design a job queue that survives worker crashes.", 3.0, 9.0),
    ("How would you debug a slow SQL query?", 2.0, 6.0),
    ("Describe a disagreement with a teammate.", 1.0, 4.5),
];

type Service = AudioQueueService<MemoryInterviewStore>;

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let session = simulate(&args).await?;
    println!("Session {} finished: {}", session.id, render(&session)?);
    Ok(())
}

/// Runs a full interview through the queue with in-process workers.
pub(crate) async fn simulate(args: &DemoArgs) -> Result<InterviewSession, AppError> {
    if args.workers == 0 {
        return Err(AppError::Operator("--workers must be at least 1".to_string()));
    }

    let service: Arc<Service> = Arc::new(AudioQueueService::new(
        Arc::new(MemoryInterviewStore::default()),
        QueueConfig::default(),
    ));

    let (session_id, scores) = seed_interview(&service).await?;
    println!(
        "Session {session_id}: {} answers queued for {} workers",
        scores.len(),
        args.workers
    );

    let scores = Arc::new(scores);
    let fail_next = Arc::new(AtomicBool::new(args.fail_first));
    let failed = run_workers(&service, args.workers, &scores, &fail_next).await?;
    if !failed.is_empty() {
        for task_id in failed {
            service.requeue(task_id, "admin:demo").await?;
            println!("admin requeued task {task_id}");
        }
        run_workers(&service, args.workers, &scores, &fail_next).await?;
    }

    match service.recompute_session_score(session_id).await? {
        ScoreOutcome::Incomplete { scored, total } => {
            println!("{scored} of {total} answers scored");
        }
        ScoreOutcome::Pending => println!("session score pending"),
        ScoreOutcome::Completed { .. } | ScoreOutcome::AlreadyCompleted { .. } => {}
    }
    Ok(service.session(session_id).await?)
}

async fn seed_interview(
    service: &Service,
) -> Result<(SessionId, HashMap<QuestionId, f64>), AppError> {
    let session = service
        .create_session(NewSession {
            candidate_id: 1001,
            job_id: 42,
        })
        .await?;

    let mut scores = HashMap::new();
    for (text, weightage, score) in QUESTIONS {
        let question = service
            .add_question(
                session.id,
                NewQuestion {
                    question_text: text.to_string(),
                    expected_answer: None,
                    weightage,
                },
            )
            .await?;
        service
            .submit_answer(
                AnswerSubmission {
                    session_id: Some(session.id),
                    question_id: Some(question.id),
                    audio: Some(AudioRef(format!("memory://answers/{}.webm", question.id))),
                },
                "candidate:1001",
            )
            .await?;
        scores.insert(question.id, score);
    }
    Ok((session.id, scores))
}

async fn run_workers(
    service: &Arc<Service>,
    workers: usize,
    scores: &Arc<HashMap<QuestionId, f64>>,
    fail_next: &Arc<AtomicBool>,
) -> Result<Vec<TaskId>, AppError> {
    let handles: Vec<_> = (0..workers)
        .map(|index| {
            let service = Arc::clone(service);
            let scores = Arc::clone(scores);
            let fail_next = Arc::clone(fail_next);
            tokio::spawn(async move { worker_loop(index, service, scores, fail_next).await })
        })
        .collect();

    let mut failed = Vec::new();
    for handle in handles {
        let worker_failures = handle
            .await
            .map_err(|err| AppError::Operator(format!("demo worker panicked: {err}")))??;
        failed.extend(worker_failures);
    }
    Ok(failed)
}

async fn worker_loop(
    index: usize,
    service: Arc<Service>,
    scores: Arc<HashMap<QuestionId, f64>>,
    fail_next: Arc<AtomicBool>,
) -> Result<Vec<TaskId>, AppError> {
    let actor = format!("worker:{index}");
    let mut failed = Vec::new();
    loop {
        let pending = service.list_pending().await?;
        if pending.is_empty() {
            return Ok(failed);
        }

        for task in pending {
            match service.claim(task.id, &actor).await {
                Ok(_) => {}
                Err(QueueServiceError::ClaimConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
            tokio::task::yield_now().await;

            if fail_next.swap(false, Ordering::AcqRel) {
                service
                    .fail(task.id, "simulated transcription timeout", &actor)
                    .await?;
                println!("{actor} failed task {}", task.id);
                failed.push(task.id);
                continue;
            }

            let score = scores.get(&task.question_id).copied().unwrap_or_default();
            let completed = service
                .complete(
                    task.id,
                    AnswerAssessment {
                        transcript: format!("Transcript of {}", task.audio.0),
                        ai_feedback: "Generated during the demo run.".to_string(),
                        score,
                    },
                    &actor,
                )
                .await?;
            println!(
                "{actor} completed task {} with score {score}",
                completed.task.id
            );
        }
    }
}
