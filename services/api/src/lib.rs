mod cli;
mod demo;
mod infra;
mod operator;
mod routes;
mod server;

use interview_ai::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
