use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sublingo_core::{
    Capabilities, ChunkSpec, JobRequest, KnownWordSet, Languages, Orchestrator, PipelineConfig,
    ProgressRecord, StageKind, TaskId, TaskRegistry, TaskStatus, plan,
};
use tokio::fs;

use crate::{llm::LlmTranslator, provider::Provider, whisper::WhisperSpeechToText};

mod cache;
mod error;
mod llm;
mod provider;
mod serve;
mod whisper;

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// CLI wrapper for Provider enum (needed for clap ValueEnum)
#[derive(Clone, Copy, Default, ValueEnum)]
enum CliProvider {
    #[default]
    Grok,
    Openai,
    Gemini,
}

impl From<CliProvider> for Provider {
    fn from(cli: CliProvider) -> Self {
        match cli {
            CliProvider::Grok => Provider::Grok,
            CliProvider::Openai => Provider::Openai,
            CliProvider::Gemini => Provider::Gemini,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CliStage {
    Transcribe,
    Filter,
    Translate,
}

impl From<CliStage> for StageKind {
    fn from(cli: CliStage) -> Self {
        match cli {
            CliStage::Transcribe => StageKind::Transcribe,
            CliStage::Filter => StageKind::Filter,
            CliStage::Translate => StageKind::Translate,
        }
    }
}

#[derive(Parser)]
#[command(name = "sublingo")]
#[command(
    about = "Transcribe videos with Whisper, highlight unknown vocabulary and translate only what you don't know"
)]
struct Cli {
    /// Pipeline config file (defaults to ~/.config/sublingo/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline on a video, or on one time range of it
    Run {
        #[command(flatten)]
        job: JobArgs,

        /// Range start in seconds (requires --end)
        #[arg(long, requires = "end")]
        start: Option<f64>,

        /// Range end in seconds (requires --start)
        #[arg(long, requires = "start")]
        end: Option<f64>,
    },
    /// Run a single stage against existing artifacts
    Stage {
        stage: CliStage,

        #[command(flatten)]
        job: JobArgs,
    },
    /// Serve submit/progress/cancel requests as JSON lines on stdio
    Serve {
        #[command(flatten)]
        providers: ProviderArgs,
    },
}

#[derive(Args)]
struct JobArgs {
    /// Video file
    video: PathBuf,

    /// Spoken language of the video
    #[arg(short, long, default_value = "de")]
    source: String,

    /// Language to translate unknown lines into
    #[arg(short, long, default_value = "en")]
    target: String,

    /// File with one known word per line
    #[arg(short, long)]
    known_words: Option<PathBuf>,

    #[command(flatten)]
    providers: ProviderArgs,
}

#[derive(Args)]
struct ProviderArgs {
    /// AI provider for translation
    #[arg(short, long, default_value = "grok")]
    provider: CliProvider,

    /// Whisper model file (downloaded to the cache when omitted)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Chat model used for translation (defaults to a small model of the provider)
    #[arg(long)]
    translate_model: Option<String>,

    /// Run Whisper on the CPU
    #[arg(long)]
    cpu: bool,
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

extern "C" fn whisper_log_callback(
    _level: u32,
    _message: *const std::ffi::c_char,
    _user_data: *mut std::ffi::c_void,
) {
    // silent
}

/// Logs go to stderr; stdout carries results and JSON responses.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sublingo=info,sublingo_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(PipelineConfig::default_path);
    let config = PipelineConfig::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?
        .with_env_overrides()?;
    Ok(config)
}

async fn load_known_words(path: Option<&Path>) -> Result<KnownWordSet> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .await
                .with_context(|| format!("reading known words from {}", path.display()))?;
            Ok(KnownWordSet::from_word_list(&raw))
        }
        None => Ok(KnownWordSet::new()),
    }
}

fn build_orchestrator(config: PipelineConfig, providers: &ProviderArgs) -> Orchestrator {
    let speech = Arc::new(WhisperSpeechToText::new(providers.model.clone(), !providers.cpu));
    let translator = Arc::new(LlmTranslator::new(
        providers.provider.into(),
        providers.translate_model.as_deref(),
    ));
    Orchestrator::new(
        TaskRegistry::new(),
        Capabilities::new(speech, translator),
        config,
    )
}

/// Poll until the task finishes; Ctrl-C asks it to stop.
async fn follow(orch: &Orchestrator, task_id: &TaskId) -> ProgressRecord {
    let pb = create_progress_bar();
    let mut cancel_sent = false;

    loop {
        let record = orch.poll_progress(task_id.as_str());
        pb.set_position(record.percent as u64);
        pb.set_message(format!("{}: {}", record.current_step, record.message));
        if record.is_terminal() {
            pb.finish_and_clear();
            return record;
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            _ = tokio::signal::ctrl_c(), if !cancel_sent => {
                cancel_sent = orch.cancel(task_id.as_str());
                pb.println(format!("{} cancelling...", style("!").yellow().bold()));
            }
        }
    }
}

fn print_outcome(record: &ProgressRecord, elapsed: Duration) {
    println!("{}", style("─".repeat(60)).dim());
    match record.status {
        TaskStatus::Completed => {
            println!(
                "{} Done {}",
                style("✓").green().bold(),
                style(format!("[{}]", format_duration(elapsed))).dim()
            );
            let Some(result) = &record.result else {
                return;
            };
            for (label, path) in [
                ("Transcript", &result.subtitle_path),
                ("Filtered", &result.filtered_path),
                ("Translated", &result.translation_path),
            ] {
                if let Some(path) = path {
                    println!("{} {}", style(format!("{:>10}:", label)).dim(), style(path.display()).cyan());
                }
            }
            if !result.vocabulary.is_empty() {
                println!(
                    "\n{} {}\n",
                    style("Unknown words:").bold(),
                    style(result.vocabulary.len()).yellow()
                );
                println!("{}", result.vocabulary.join(", "));
            }
        }
        TaskStatus::Cancelled => {
            println!("{} Cancelled: {}", style("!").yellow().bold(), record.message);
        }
        _ => {
            eprintln!(
                "{} {} failed: {}",
                style("Error:").red().bold(),
                record.current_step,
                record.error.as_deref().unwrap_or(&record.message)
            );
        }
    }
}

async fn submit_and_follow(
    orch: &Orchestrator,
    submission: impl std::future::Future<Output = sublingo_core::Result<TaskId>>,
) -> Result<()> {
    let started = Instant::now();
    let task_id = submission.await?;
    tracing::debug!(task_id = %task_id, "following task");

    let record = follow(orch, &task_id).await;
    print_outcome(&record, started.elapsed());

    match record.status {
        TaskStatus::Completed => Ok(()),
        TaskStatus::Cancelled => std::process::exit(130),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    unsafe {
        whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run { job, start, end } => {
            let provider: Provider = job.providers.provider.into();
            // Validate API key early
            if let Err(e) = provider.api_key() {
                eprintln!("{} {}", style("Error:").red().bold(), e);
                std::process::exit(1);
            }

            println!(
                "\n{}  {}\n",
                style("sublingo").cyan().bold(),
                style(job.video.display()).dim()
            );

            let orch = build_orchestrator(config, &job.providers);
            let known = load_known_words(job.known_words.as_deref()).await?;
            let languages = Languages::new(&job.source, &job.target);

            match (start, end) {
                (Some(start), Some(end)) => {
                    let chunk: ChunkSpec = plan(&job.video, start, end)?;
                    submit_and_follow(&orch, orch.submit_chunk(chunk, languages, known)).await
                }
                _ => {
                    let request = JobRequest::new(job.video.clone(), languages, known);
                    submit_and_follow(&orch, orch.submit_full_pipeline(request)).await
                }
            }
        }
        Command::Stage { stage, job } => {
            let stage: StageKind = stage.into();
            if stage == StageKind::Translate {
                let provider: Provider = job.providers.provider.into();
                if let Err(e) = provider.api_key() {
                    eprintln!("{} {}", style("Error:").red().bold(), e);
                    std::process::exit(1);
                }
            }

            let orch = build_orchestrator(config, &job.providers);
            let known = load_known_words(job.known_words.as_deref()).await?;
            let request = JobRequest::new(
                job.video.clone(),
                Languages::new(&job.source, &job.target),
                known,
            );
            submit_and_follow(&orch, orch.submit_stage(stage, request)).await
        }
        Command::Serve { providers } => {
            let orch = build_orchestrator(config, &providers);
            serve::serve(orch).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_chunk_run() {
        let cli = Cli::try_parse_from([
            "sublingo", "run", "folge.mp4", "--start", "60", "--end", "120", "-k", "words.txt",
        ])
        .unwrap();

        match cli.command {
            Command::Run { job, start, end } => {
                assert_eq!(job.video, PathBuf::from("folge.mp4"));
                assert_eq!((start, end), (Some(60.0), Some(120.0)));
                assert_eq!(job.source, "de");
                assert_eq!(job.known_words, Some(PathBuf::from("words.txt")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_translate_model_override() {
        let cli = Cli::try_parse_from([
            "sublingo", "serve", "-p", "openai", "--translate-model", "gpt-4.1-mini",
        ])
        .unwrap();

        let Command::Serve { providers } = cli.command else {
            panic!("expected serve");
        };
        let provider: Provider = providers.provider.into();
        assert_eq!(
            provider.endpoint(providers.translate_model.as_deref()).model,
            "gpt-4.1-mini"
        );
    }

    #[test]
    fn test_cli_start_requires_end() {
        assert!(Cli::try_parse_from(["sublingo", "run", "folge.mp4", "--start", "60"]).is_err());
    }

    #[test]
    fn test_cli_stage_and_global_config() {
        let cli = Cli::try_parse_from([
            "sublingo", "stage", "filter", "folge.mp4", "--config", "/tmp/c.toml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(
            cli.command,
            Command::Stage {
                stage: CliStage::Filter,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_known_words_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, "# Wortschatz\nHallo\nwie\n").unwrap();

        let known = load_known_words(Some(&path)).await.unwrap();
        assert!(known.contains("hallo"));
        assert_eq!(known.len(), 2);
        assert!(load_known_words(None).await.unwrap().is_empty());
    }

    #[test]
    fn test_missing_config_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("none.toml"))).unwrap();
        assert_eq!(config.batch_size, PipelineConfig::default().batch_size);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs_f64(12.34)), "12.3s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }
}
