use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use safesim::{
    extraction::highlight, BackendSelector, BatchOutcome, BatchReport, CancellationToken,
    EntityExtractor, KeywordRelevanceGate, PipelineResult, RelevanceGate, SafeSimConfig,
    SafeSimRuntime, Strictness, VerificationResult,
};
use serde_json::json;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "safesim", version, about = "Verified plain-language simplification of clinical text")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// JSON-lines log file (overrides the config).
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// JSON-lines event file (overrides the config).
    #[arg(long, global = true)]
    event_log: Option<PathBuf>,
    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Simplifies one text and verifies the result.
    Simplify(SimplifyArgs),
    /// Simplifies every text in a file.
    Batch(BatchArgs),
    /// Lists the facts extracted from a text.
    Extract(InputArgs),
    /// Checks a candidate against the facts of a source text.
    Verify(VerifyArgs),
    /// Runs the relevance gate on a text.
    Classify {
        #[command(flatten)]
        input: InputArgs,
        /// Let UNCLEAR texts through.
        #[arg(long)]
        lenient: bool,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Text to process; read from --file or stdin when omitted.
    text: Option<String>,
    /// File holding the text.
    #[arg(long, conflicts_with = "text")]
    file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GenerationArgs {
    /// Backend: rule-based, openai, anthropic or local.
    #[arg(long)]
    backend: Option<BackendSelector>,
    /// Strictness: high, medium or low.
    #[arg(long)]
    strictness: Option<Strictness>,
    /// Regenerations after the first attempt.
    #[arg(long)]
    max_retries: Option<usize>,
    /// Generation timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct SimplifyArgs {
    #[command(flatten)]
    input: InputArgs,
    #[command(flatten)]
    generation: GenerationArgs,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Input: a JSON array of strings, or one text per line.
    #[arg(long)]
    input: PathBuf,
    /// Write the JSON report here.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Pipelines run at once.
    #[arg(long)]
    concurrency: Option<usize>,
    #[command(flatten)]
    generation: GenerationArgs,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Source clinical text.
    #[arg(long)]
    source: String,
    /// Candidate simplification.
    #[arg(long)]
    candidate: String,
    /// Strictness: high, medium or low.
    #[arg(long)]
    strictness: Option<Strictness>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SAFESIM_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SafeSimConfig::load(path)?,
        None => SafeSimConfig::default(),
    };
    if let Some(path) = &cli.log_file {
        config.telemetry.log_path = Some(path.clone());
    }
    if let Some(path) = &cli.event_log {
        config.telemetry.event_path = Some(path.clone());
    }

    match cli.command {
        Commands::Simplify(args) => {
            apply_generation(&mut config, &args.generation)?;
            let text = read_input(&args.input)?;
            let runtime = Runtime::new()?;
            let safesim = SafeSimRuntime::from_config(config)?;
            let result = runtime.block_on(safesim.process_default(&text));
            if cli.json {
                println!("{}", result.to_json()?);
            } else {
                print_result(&result);
            }
        }
        Commands::Batch(args) => {
            apply_generation(&mut config, &args.generation)?;
            if let Some(concurrency) = args.concurrency {
                config.pipeline.batch_concurrency = concurrency;
            }
            config.validate()?;
            let texts = read_batch(&args.input)?;
            info!(texts = texts.len(), input = %args.input.display(), "starting batch");
            let runtime = Runtime::new()?;
            let safesim = SafeSimRuntime::from_config(config)?;
            let token = CancellationToken::new();
            let report = runtime.block_on(async {
                let watcher = token.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        watcher.cancel();
                    }
                });
                let settings = safesim.config();
                safesim
                    .batch(texts, settings.backend.kind, settings.pipeline.strictness, &token)
                    .await
            });
            if let Some(path) = &args.output {
                fs::write(path, serde_json::to_vec_pretty(&report)?)
                    .with_context(|| format!("writing report {}", path.display()))?;
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Extract(input) => {
            let text = read_input(&input)?;
            let extractor: EntityExtractor = config.extractor()?;
            let facts = extractor.extract(&text);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&facts)?);
            } else {
                println!("{}", highlight(&text, &facts));
                for fact in &facts {
                    println!(
                        "  {:<10} {:<13} {}",
                        fact.kind().label(),
                        format!("{:?}", fact.mutability()).to_uppercase(),
                        fact.surface()
                    );
                }
            }
        }
        Commands::Verify(args) => {
            let strictness = args.strictness.unwrap_or(config.pipeline.strictness);
            let facts = config.extractor()?.extract(&args.source);
            let verdict = config.verifier().verify(&facts, &args.candidate, strictness);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                print_verdict(&verdict);
            }
        }
        Commands::Classify { input, lenient } => {
            let text = read_input(&input)?;
            let assessment = KeywordRelevanceGate::new(!lenient).classify(&text);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&assessment)?);
            } else {
                println!(
                    "{} (confidence {:.2}, {})",
                    assessment.status,
                    assessment.confidence,
                    if assessment.is_relevant { "accepted" } else { "rejected" }
                );
                println!("{}", assessment.explanation);
            }
        }
    }
    Ok(())
}

fn apply_generation(config: &mut SafeSimConfig, args: &GenerationArgs) -> Result<()> {
    if let Some(backend) = args.backend {
        config.backend.kind = backend;
    }
    if let Some(strictness) = args.strictness {
        config.pipeline.strictness = strictness;
    }
    if let Some(retries) = args.max_retries {
        config.pipeline.max_retries = retries;
    }
    if let Some(timeout) = args.timeout_ms {
        config.pipeline.generation_timeout_ms = timeout;
    }
    config.validate()
}

fn read_input(args: &InputArgs) -> Result<String> {
    let text = match (&args.text, &args.file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
        }
        (None, None) => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("reading stdin")?;
            buffer
        }
    };
    if text.trim().is_empty() {
        bail!("no input text");
    }
    Ok(text)
}

fn read_batch(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if raw.trim_start().starts_with('[') {
        return serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a JSON array of strings", path.display()));
    }
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn verdict_label(result: &PipelineResult) -> &'static str {
    if result.was_rejected() {
        "REJECTED"
    } else if result.is_safe {
        "SAFE"
    } else {
        "UNSAFE"
    }
}

fn print_result(result: &PipelineResult) {
    if !result.simplified_text.is_empty() {
        println!("{}\n", result.simplified_text);
    }
    println!(
        "{}: score {:.2} after {} attempt(s) with {} ({} strictness)",
        verdict_label(result),
        result.score(),
        result.attempts_used,
        result.backend,
        result.strictness
    );
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    println!("{}", result.explanation);
}

fn print_verdict(verdict: &VerificationResult) {
    println!("{}", verdict.explain());
    for warning in verdict.warnings() {
        println!("  warning: {warning}");
    }
}

fn print_report(report: &BatchReport) {
    for entry in &report.entries {
        match &entry.outcome {
            BatchOutcome::Completed(result) => println!(
                "#{:<4} {:<8} score {:.2}  attempts {}  {}",
                entry.index,
                verdict_label(result),
                result.score(),
                result.attempts_used,
                preview(&result.original_text)
            ),
            BatchOutcome::Skipped => println!("#{:<4} SKIPPED", entry.index),
            BatchOutcome::Failed { reason } => println!("#{:<4} FAILED   {reason}", entry.index),
        }
    }
    let stats = &report.statistics;
    println!(
        "{}",
        json!({
            "total": stats.total,
            "safe": stats.safe,
            "unsafe": stats.unsafe_count,
            "rejected": stats.rejected,
            "skipped": stats.skipped,
            "safety_rate": stats.safety_rate,
            "average_score": stats.average_score,
            "average_attempts": stats.average_attempts,
            "cancelled": report.cancelled,
        })
    );
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 60 {
        format!("{}...", flat.chars().take(57).collect::<String>())
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_simplify_flags() {
        let cli = Cli::try_parse_from([
            "safesim",
            "--json",
            "simplify",
            "Take 50mg daily",
            "--backend",
            "claude",
            "--strictness",
            "medium",
            "--max-retries",
            "1",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Simplify(args) = cli.command else {
            panic!("expected simplify");
        };
        assert_eq!(args.generation.backend, Some(BackendSelector::Anthropic));
        assert_eq!(args.generation.strictness, Some(Strictness::Medium));
        assert_eq!(args.input.text.as_deref(), Some("Take 50mg daily"));
    }

    #[test]
    fn reads_batch_inputs() {
        let dir = tempdir().unwrap();
        let lines = dir.path().join("notes.txt");
        fs::write(&lines, "Take 50mg Atenolol daily.\n\n  Give 5mg PO bid.  \n").unwrap();
        assert_eq!(
            read_batch(&lines).unwrap(),
            vec!["Take 50mg Atenolol daily.", "Give 5mg PO bid."]
        );
        let array = dir.path().join("notes.json");
        fs::write(&array, r#"["first note", "second note"]"#).unwrap();
        assert_eq!(read_batch(&array).unwrap().len(), 2);
    }

    #[test]
    fn generation_overrides_are_validated() {
        let mut config = SafeSimConfig::default();
        let args = GenerationArgs {
            backend: Some(BackendSelector::Local),
            strictness: None,
            max_retries: Some(99),
            timeout_ms: None,
        };
        assert!(apply_generation(&mut config, &args).is_err());
        assert_eq!(config.backend.kind, BackendSelector::Local);
    }

    #[test]
    fn shortens_previews() {
        assert_eq!(preview("a  b\nc"), "a b c");
        assert!(preview(&"x".repeat(100)).ends_with("..."));
    }
}
