use crate::demo::{run_demo, DemoArgs};
use crate::operator::{run_task_command, ReapArgs, RequeueArgs, TaskAction};
use crate::server;
use clap::{Args, Parser, Subcommand};
use interview_ai::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Interview Answer Queue",
    about = "Serve and operate the audio answer processing queue of the interview bot",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Inspect and repair the audio task queue in the configured database
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },
    /// Run an in-memory interview end to end with racing workers
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum TasksCommand {
    /// List tasks waiting for a worker, oldest first
    Pending,
    /// Move a failed task back to pending
    Requeue(RequeueArgs),
    /// Fail tasks stuck in processing
    Reap(ReapArgs),
}

impl From<TasksCommand> for TaskAction {
    fn from(command: TasksCommand) -> Self {
        match command {
            TasksCommand::Pending => TaskAction::Pending,
            TasksCommand::Requeue(args) => TaskAction::Requeue(args),
            TasksCommand::Reap(args) => TaskAction::Reap(args),
        }
    }
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Tasks { command } => run_task_command(command.into()).await,
        Command::Demo(args) => run_demo(args).await,
    }
}
