use anyhow::Result;
use clap::{Parser, Subcommand};

use strangle_cli::commands::{
    self, ApproveArgs, CancelArgs, EditArgs, ExecuteArgs, ListArgs, MonitorArgs, RejectArgs,
    StatusArgs, SuggestArgs,
};
use strangle_cli::AppContext;

#[derive(Parser)]
#[command(name = "strangle")]
#[command(about = "Short strangle suggestion and batch execution engine", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "config/Config.toml")]
    config: String,
    /// Config profile overlay (Config.<profile>.toml)
    #[arg(long, global = true, env = "STRANGLE_PROFILE")]
    profile: Option<String>,
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline and store a trade suggestion
    Suggest(SuggestArgs),
    /// List stored suggestions
    List(ListArgs),
    /// Approve a pending suggestion
    Approve(ApproveArgs),
    /// Reject a pending or approved suggestion
    Reject(RejectArgs),
    /// Change lots or strikes of a pending suggestion
    Edit(EditArgs),
    /// Execute an approved suggestion in batches (Ctrl-C cancels)
    Execute(ExecuteArgs),
    /// Show an execution's progress
    Status(StatusArgs),
    /// Request cancellation of a running execution
    Cancel(CancelArgs),
    /// Report running executions and fail stalled ones
    Monitor(MonitorArgs),
}

fn init_logging(log_file: Option<&str>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let ctx = AppContext::open(&cli.config, cli.profile.as_deref()).await?;

    match cli.command {
        Commands::Suggest(args) => {
            commands::run_suggest(&ctx, &args).await?;
        }
        Commands::List(args) => {
            commands::run_list(&ctx, &args).await?;
        }
        Commands::Approve(args) => {
            commands::run_approve(&ctx, &args).await?;
        }
        Commands::Reject(args) => {
            commands::run_reject(&ctx, &args).await?;
        }
        Commands::Edit(args) => {
            commands::run_edit(&ctx, &args).await?;
        }
        Commands::Execute(args) => {
            commands::run_execute(&ctx, &args).await?;
        }
        Commands::Status(args) => {
            commands::run_status(&ctx, &args).await?;
        }
        Commands::Cancel(args) => {
            commands::run_cancel(&ctx, &args).await?;
        }
        Commands::Monitor(args) => {
            commands::run_monitor(&ctx, &args).await?;
        }
    }

    Ok(())
}
