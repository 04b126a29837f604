#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use indicatif::{ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use subflow::app_config::{CompletionProvider, LogLevel};
use subflow::{
    AdminAction, Config, JsonFileSource, Repository, TaskOrchestrator, TaskStatus, TaskStore, TranslationTask,
    build_service,
};

/// CLI wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => LogLevel::Error,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Trace => LogLevel::Trace,
        }
    }
}

/// CLI wrapper for CompletionProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliProvider {
    Ollama,
    Anthropic,
}

impl From<CliProvider> for CompletionProvider {
    fn from(cli_provider: CliProvider) -> Self {
        match cli_provider {
            CliProvider::Ollama => CompletionProvider::Ollama,
            CliProvider::Anthropic => CompletionProvider::Anthropic,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate a JSON subtitle file and wait for the result
    Translate(TranslateArgs),

    /// Show the state of a task, or a store overview without one
    Status {
        /// Task identifier
        task_id: Option<String>,
    },

    /// Pause, continue, cancel, restart or delete a task
    Control {
        /// Task identifier
        task_id: String,
        /// Action to apply (pause, continue, cancel, restart, delete)
        action: AdminAction,
    },

    /// Resume tasks abandoned by a previous run
    Recover,

    /// Delete cached translations older than the given age
    PurgeCache {
        /// Age in days (defaults to cache.max_age_days)
        #[arg(long)]
        days: Option<i64>,
    },

    /// Generate shell completions for subflow
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct TranslateArgs {
    /// JSON array of {start, end, text} entries
    #[arg(value_name = "INPUT_PATH")]
    input_path: PathBuf,

    /// Target language code (e.g., 'fr', 'de', 'ja')
    #[arg(short, long)]
    target_language: String,

    /// Source language code (defaults to the configured one)
    #[arg(short, long)]
    source_language: Option<String>,

    /// Title recorded for the video
    #[arg(long)]
    title: Option<String>,

    /// Output file (defaults to <input>.<target>.json)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Completion backend to use
    #[arg(short, long, value_enum)]
    provider: Option<CliProvider>,

    /// Model name to use
    #[arg(short, long)]
    model: Option<String>,
}

/// subflow - durable subtitle translation with language models
#[derive(Parser, Debug)]
#[command(name = "subflow")]
#[command(version)]
#[command(about = "Resumable subtitle translation orchestrator")]
#[command(long_about = "subflow splits subtitle streams into segments, translates them with a language model and keeps every step in a local database so tasks can be paused, resumed and recovered.

EXAMPLES:
    subflow translate talk.json -t fr            # Translate into French
    subflow translate talk.json -t de -p anthropic
    subflow status <TASK_ID>                     # Show task progress
    subflow control <TASK_ID> pause              # Pause a running task
    subflow control <TASK_ID> continue           # Resume where it stopped
    subflow recover                              # Resume abandoned tasks
    subflow completions bash > subflow.bash      # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. If the file doesn't
    exist, a default one is created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", global = true)]
    config_path: String,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI color code for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "1;31",
            Level::Warn => "1;33",
            Level::Info => "1;32",
            Level::Debug => "1;36",
            Level::Trace => "1;35",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "\x1B[{}m{} {:<5} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn level_filter(level: &LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Level is refined once the configuration is loaded
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(*shell, &mut cmd, "subflow", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = load_config(&cli.config_path)?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone().into();
    }
    if let Commands::Translate(args) = &cli.command {
        if let Some(provider) = &args.provider {
            config.completion.provider = provider.clone().into();
        }
        if let Some(model) = &args.model {
            config.completion.model = model.clone();
        }
        if let Some(source_language) = &args.source_language {
            config.source_language = source_language.clone();
        }
    }
    log::set_max_level(level_filter(&config.log_level));

    config.validate().context("Configuration validation failed")?;

    let (orchestrator, repository) = build_orchestrator(config)?;

    match cli.command {
        Commands::Translate(args) => run_translate(&orchestrator, args).await,
        Commands::Status { task_id: Some(task_id) } => {
            let task = orchestrator.status(&task_id).await?;
            print_task(&task);
            Ok(())
        }
        Commands::Status { task_id: None } => print_overview(&orchestrator, &repository).await,
        Commands::Control { task_id, action } => run_control(&orchestrator, &task_id, action).await,
        Commands::Recover => {
            let started = orchestrator.recover_stale_tasks().await?;
            info!("Recovering {} tasks", started.len());
            for (task_id, handle) in started {
                match handle.await {
                    Ok(Ok(task)) => info!("Task {} ended {}", task_id, task.status),
                    Ok(Err(e)) => warn!("Task {} stopped: {}", task_id, e),
                    Err(e) => warn!("Task {} panicked: {}", task_id, e),
                }
            }
            Ok(())
        }
        Commands::PurgeCache { days } => {
            let days = days.unwrap_or(orchestrator.config().cache.max_age_days);
            let cache = subflow::translation::ResultCache::new(orchestrator.store(), orchestrator.config());
            let purged = cache.purge_older_than(days).await?;
            info!("Purged {} cached translations older than {} days", purged, days);
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

/// Load the configuration, writing a default one when missing
fn load_config(config_path: &str) -> Result<Config> {
    if Path::new(config_path).exists() {
        return Config::from_file(config_path);
    }

    warn!("Config file not found at '{}', creating default config.", config_path);
    let config = Config::default();
    config.write_to(config_path)?;
    Ok(config)
}

fn build_orchestrator(config: Config) -> Result<(TaskOrchestrator, Repository)> {
    let repository = Repository::open(config.database_path.as_deref())?;
    let service = build_service(&config.completion);
    let orchestrator = TaskOrchestrator::new(
        config,
        Arc::new(repository.clone()),
        Arc::new(JsonFileSource::new()),
        service,
    );
    Ok((orchestrator, repository))
}

async fn run_translate(orchestrator: &TaskOrchestrator, args: TranslateArgs) -> Result<()> {
    let input_path = std::fs::canonicalize(&args.input_path)
        .with_context(|| format!("Input file does not exist: {:?}", args.input_path))?;
    let title = args.title.clone().unwrap_or_else(|| {
        input_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled".to_string())
    });

    let source_language = orchestrator.config().source_language.clone();
    let video = orchestrator
        .register_video(&title, &source_language, &input_path.to_string_lossy())
        .await?;
    let task = orchestrator.submit(&video.id, &args.target_language).await?;
    info!("Task {} queued ({} -> {})", task.id, video.source_language, task.target_language);

    let mut events = orchestrator.subscribe(&task.id);
    let handle = orchestrator.start(&task.id)?;

    let progress_bar = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
        .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}% {msg}"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress_bar.set_style(style.progress_chars("█▓▒░"));
    progress_bar.enable_steady_tick(Duration::from_millis(120));

    loop {
        match events.recv().await {
            Ok(event) => {
                progress_bar.set_position(event.progress.round() as u64);
                progress_bar.set_message(format!("{}: {}", event.stage, event.message));
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Progress display skipped {} events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    progress_bar.finish_and_clear();

    let task = handle.await.context("Translation task panicked")??;
    print_task(&task);

    let Some(entries) = orchestrator.result(&task.id).await? else {
        return Err(anyhow!(
            "Task {} ended {}: {}",
            task.id,
            task.status,
            task.error_message.as_deref().unwrap_or("no result")
        ));
    };

    let output = args.output.unwrap_or_else(|| {
        let stem = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "subtitles".to_string());
        input_path.with_file_name(format!("{}.{}.json", stem, task.target_language))
    });
    let json = serde_json::to_string_pretty(&entries).context("Failed to serialize translation")?;
    std::fs::write(&output, json).with_context(|| format!("Failed to write {:?}", output))?;

    info!("Success: {:?} ({} entries)", output, entries.len());
    Ok(())
}

async fn run_control(orchestrator: &TaskOrchestrator, task_id: &str, action: AdminAction) -> Result<()> {
    let applied = match action {
        // The CLI process owns the execution, so run it in the foreground
        AdminAction::Continue => {
            let task = orchestrator.resume(task_id).await?;
            print_task(&task);
            return Ok(());
        }
        AdminAction::Restart => {
            let applied = orchestrator.control(task_id, action).await?;
            while orchestrator.is_running(task_id) {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            applied
        }
        _ => orchestrator.control(task_id, action).await?,
    };

    if applied {
        info!("{} applied to task {}", action, task_id);
        if action != AdminAction::Delete {
            print_task(&orchestrator.status(task_id).await?);
        }
    } else {
        warn!("{} does not apply to task {} in its current state", action, task_id);
    }
    Ok(())
}

/// Store counters and the tasks that still have work to do
async fn print_overview(orchestrator: &TaskOrchestrator, repository: &Repository) -> Result<()> {
    let stats = repository.connection().stats()?;
    println!("{}", stats);

    let active = orchestrator.store().list_tasks_by_status(&TaskStatus::ACTIVE).await?;
    let suspended = orchestrator
        .store()
        .list_tasks_by_status(&[TaskStatus::Paused, TaskStatus::Failed])
        .await?;
    if active.is_empty() && suspended.is_empty() {
        println!("No unfinished tasks");
        return Ok(());
    }
    for task in active.iter().chain(suspended.iter()) {
        println!(
            "{}  {:<11} {:>5.1}%  {} -> {}",
            task.id,
            task.status.to_string(),
            task.progress_percentage,
            task.video_id,
            task.target_language
        );
    }
    Ok(())
}

fn print_task(task: &TranslationTask) {
    println!("Task:      {}", task.id);
    println!("Video:     {}", task.video_id);
    println!("Target:    {}", task.target_language);
    println!("Status:    {} ({})", task.status, task.current_phase);
    println!("Progress:  {:.1}%", task.progress_percentage);
    println!("Segments:  {}/{}", task.completed_segments, task.total_segments);
    if let Some(eta) = task.estimated_time_remaining {
        println!("ETA:       {:.0}s", eta);
    }
    if let Some(quality) = task.quality_score {
        println!("Quality:   {:.2}", quality);
    }
    if let Some(error) = &task.error_message {
        println!("Error:     {}", error);
    }
}
