//! ergon CLI - resumable batch inference for OpenAI-compatible endpoints.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ergon::{BatchRunner, ChatClient, CheckpointStore, Config, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "ergon")]
#[command(version)]
#[command(about = "Resumable batch inference for OpenAI-compatible endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the batch against the configured endpoint
    Run,

    /// Validate configuration file
    Validate,

    /// Show checkpoint progress without running
    Status,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# ergon configuration file

[provider]
# API key (can also use ERGON_API_KEY env var)
# api_key = "sk-..."
base_url = "https://api.moonshot.cn/v1"
model = "moonshot-v1-8k"
# system_prompt = "You are a careful assistant."
# temperature = 0.3
# top_p = 0.9
timeout_secs = 180

[runtime]
max_concurrent = 5
retry_times = 3
retry_delay_secs = 1.0
save_interval = 10

[io]
input_file = "questions.csv"    # columns: id, question
output_file = "output/answers.csv"
checkpoint_dir = "checkpoints/"
"#;
    println!("{example}");
}

/// Canonical identity of the input batch, used for stale-checkpoint checks.
fn input_identity(path: &std::path::Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!("  Endpoint:    {}", config.provider.base_url);
            info!("  Model:       {}", config.provider.model);
            info!("  Concurrency: {}", config.runtime.max_concurrent);
            info!(
                "  Retry:       {} times, {}s apart",
                config.runtime.retry_times, config.runtime.retry_delay_secs
            );
        }

        Commands::Status => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            let store = CheckpointStore::new(&config.io.checkpoint_dir)
                .context("Failed to open checkpoint store")?;

            match store.load() {
                Some(state) => {
                    println!("Checkpoint: {}", store.path().display());
                    println!("  Input:     {}", state.metadata.input_file);
                    println!("  Started:   {}", state.metadata.started_at);
                    println!(
                        "  Progress:  {}/{}",
                        state.metadata.processed_count, state.metadata.total_count
                    );
                    println!("  Failed:    {}", state.metadata.failed_ids.len());
                    println!("  Tokens:    {}", state.metadata.total_tokens);
                    println!(
                        "  Complete:  {}",
                        if state.is_complete() { "yes" } else { "no" }
                    );
                }
                None => println!("No checkpoint found"),
            }
        }

        Commands::Run => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            let api_key = config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            let tasks = ergon::load_tasks(&config.io.input_file)
                .context("Failed to load input batch")?;
            let source = input_identity(&config.io.input_file);

            let client = Arc::new(ChatClient::new(&config.provider, api_key)?);
            let limiter = Arc::clone(client.rate_limiter());

            let pool = Arc::new(WorkerPool::new(client, &config.runtime));
            let store = CheckpointStore::new(&config.io.checkpoint_dir)
                .context("Failed to open checkpoint store")?;
            let runner = BatchRunner::new(pool, store, &config.runtime);

            let stats = runner
                .run(tasks, &source, &config.io.output_file)
                .await?;

            println!("\n=== Batch Complete ===");
            println!("Tasks:       {}", stats.total_tasks);
            println!("Processed:   {}", stats.processed);
            println!("Succeeded:   {}", stats.succeeded);
            println!("Failed:      {}", stats.failed);
            println!("Tokens:      {}", stats.total_tokens);
            println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            println!("Output:      {:?}", config.io.output_file);

            let (requests, throttled) = limiter.totals();
            if throttled > 0 {
                info!(requests, throttled, "Endpoint throttling observed during run");
            }
        }
    }

    Ok(())
}
