//! Patternwise - Adaptive Pattern Confidence Engine
//!
//! Command-line front end: records observations and feedback, queries
//! ranked suggestions, runs maintenance and manages the persisted store.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use patternwise_core::{
    BackendKind, Engine, EngineConfig, FeedbackAction, FeedbackEvent, Observation, PatternContext,
    PatternId, PatternKind, SuggestionQuery,
};
use serde::Deserialize;
use std::future::Future;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn, Level};
use tracing_subscriber::EnvFilter;

/// Get the default data directory using XDG_DATA_HOME standard
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("patternwise")
}

#[derive(Parser)]
#[command(name = "patternwise")]
#[command(about = "Adaptive pattern confidence engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); PATTERNWISE__* environment variables override it
    #[arg(short, long, env = "PATTERNWISE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides persistence.path)
    #[arg(long, env = "PATTERNWISE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Persistence backend (overrides persistence.backend)
    #[arg(long)]
    backend: Option<Backend>,

    /// Set log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Memory,
    File,
    Sqlite,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a pattern observation
    Observe {
        /// Pattern kind (syntax, naming, structure, style, refactor, test, doc, error_handling)
        #[arg(short, long)]
        kind: PatternKind,

        #[arg(short = 'L', long)]
        language: String,

        /// Pattern content
        content: String,

        /// Context attribute as key=value (repeatable)
        #[arg(long = "context")]
        context: Vec<String>,
    },

    /// Record feedback for a pattern
    Feedback {
        /// Pattern ID
        id: PatternId,

        /// accept, reject or ignore
        action: FeedbackAction,
    },

    /// List ranked suggestions
    Suggest {
        #[arg(short = 'L', long)]
        language: String,

        #[arg(long = "context")]
        context: Vec<String>,

        #[arg(short, long, default_value = "0.3")]
        min_confidence: f64,

        #[arg(short = 'k', long = "kind")]
        kinds: Vec<PatternKind>,

        #[arg(short = 'n', long)]
        limit: Option<usize>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Explain the adjusted confidence of a pattern
    Explain {
        id: PatternId,

        #[arg(long = "context")]
        context: Vec<String>,
    },

    /// Run one maintenance sweep (decay, cleanup, rank)
    Maintain {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show aggregate insights
    Insights {
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Export everything learned as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete all learned patterns and behavior data
    Reset {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Read observations and feedback as JSON lines from stdin
    Ingest,
}

/// One line of `ingest` input
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IngestRecord {
    Observation(Observation),
    Feedback(FeedbackEvent),
}

/// Resolve configuration: file/env layers, then command-line overrides
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(backend) = cli.backend {
        config.persistence.backend = match backend {
            Backend::Memory => BackendKind::Memory,
            Backend::File => BackendKind::File,
            Backend::Sqlite => BackendKind::Sqlite,
        };
    } else if config.persistence.backend == BackendKind::Memory && cli.config.is_none() {
        // One-shot commands are useless without durable state
        config.persistence.backend = BackendKind::File;
    }

    let data_dir = cli
        .data_dir
        .clone()
        .or_else(|| config.persistence.path.clone())
        .unwrap_or_else(default_data_dir);
    config.persistence.path = Some(match config.persistence.backend {
        BackendKind::Sqlite if cli.data_dir.is_some() || config.persistence.path.is_none() => {
            data_dir.join("patterns.db")
        }
        _ => data_dir,
    });

    // Sweeps run only on demand from the command line
    config.maintenance.enabled = false;

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn parse_context(pairs: &[String]) -> Result<PatternContext> {
    Ok(PatternContext::from_pairs(pairs.iter().map(String::as_str))?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Observe {
            kind,
            language,
            content,
            context,
        } => {
            let observation =
                Observation::new(kind, content, language).with_context(parse_context(&context)?);
            let id = engine.observe(observation).await?;
            println!("{}", id);
        }
        Commands::Feedback { id, action } => {
            let outcome = engine.apply_feedback(FeedbackEvent::new(id, action)).await?;
            println!(
                "{} {}: {:.2} -> {:.2}",
                outcome.pattern_id.short(),
                outcome.action,
                outcome.old_confidence,
                outcome.new_confidence
            );
        }
        Commands::Suggest {
            language,
            context,
            min_confidence,
            kinds,
            limit,
            format,
        } => {
            let mut query = SuggestionQuery::new(language, parse_context(&context)?, min_confidence)
                .with_kinds(kinds);
            if let Some(limit) = limit {
                query = query.with_limit(limit);
            }
            let suggestions = engine.query(&query);

            match format {
                OutputFormat::Json => print_json(&suggestions)?,
                OutputFormat::Text => {
                    if suggestions.is_empty() {
                        println!("No suggestions");
                    }
                    for (rank, suggestion) in suggestions.iter().enumerate() {
                        println!(
                            "{:>3}. {:.2}  [{}] {}  ({})",
                            rank + 1,
                            suggestion.adjusted_confidence,
                            suggestion.pattern.kind,
                            suggestion.pattern.content,
                            suggestion.pattern.id.short()
                        );
                    }
                }
            }
        }
        Commands::Explain { id, context } => {
            let breakdown = engine.explain(&id, &parse_context(&context)?)?;
            println!("base        {:.3}", breakdown.base);
            for term in &breakdown.contributions {
                println!(
                    "{:<18} {:+.3}  (raw {:+.3} x {:.2})",
                    term.strategy.name(),
                    term.value,
                    term.raw,
                    term.weight
                );
            }
            println!("adjusted    {:.3}", breakdown.adjusted);
        }
        Commands::Maintain { format } => {
            let report = engine.run_maintenance_at(chrono::Utc::now()).await?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => {
                    println!(
                        "Processed {}, decayed {}, removed {}",
                        report.sweep.processed,
                        report.sweep.decayed,
                        report.sweep.removed.len()
                    );
                    for removed in &report.sweep.removed {
                        println!("  removed {}: {}", removed.id.short(), removed.reason);
                    }
                }
            }
        }
        Commands::Insights { top, format } => {
            let report = engine.insights(top);
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => {
                    let dist = report.confidence_distribution;
                    println!("Patterns: {}", report.total_patterns);
                    println!(
                        "Confidence: {} high, {} medium, {} low",
                        dist.high, dist.medium, dist.low
                    );
                    println!("Top patterns:");
                    for pattern in &report.top_patterns {
                        println!(
                            "  {:.2}  [{} / {}] {}",
                            pattern.confidence, pattern.kind, pattern.language, pattern.content
                        );
                    }
                    println!("Acceptance by kind:");
                    for summary in &report.acceptance_by_kind {
                        println!(
                            "  {:<15} {:>5.1}%  ({} of {} suggestions)",
                            summary.kind.as_str(),
                            summary.acceptance_rate * 100.0,
                            summary.accepted,
                            summary.suggested
                        );
                    }
                    for domain in &report.behavior {
                        println!(
                            "  {} feedback: {} accepted, {} rejected, {} ignored",
                            domain.domain, domain.accepted, domain.rejected, domain.ignored
                        );
                    }
                }
            }
        }
        Commands::Export { output } => {
            let json = engine.export_json()?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("Exported to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("Refusing to delete learned data without --yes");
            }
            let removed = engine.reset().await?;
            println!("Removed {} patterns", removed);
        }
        Commands::Ingest => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let (mut observed, mut feedback, mut skipped) = (0usize, 0usize, 0usize);
            let mut line_no = 0usize;

            while let Some(line) = lines.next_line().await? {
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                let record: IngestRecord = match serde_json::from_str(&line) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("Line {}: {}", line_no, e);
                        skipped += 1;
                        continue;
                    }
                };
                let result = match record {
                    IngestRecord::Observation(obs) => engine.observe(obs).await.map(|_| observed += 1),
                    IngestRecord::Feedback(event) => {
                        engine.apply_feedback(event).await.map(|_| feedback += 1)
                    }
                };
                if let Err(e) = result {
                    if !e.is_soft() {
                        return Err(e.into());
                    }
                    warn!("Line {}: {}", line_no, e);
                    skipped += 1;
                }
            }

            println!(
                "Ingested {} observations, {} feedback events ({} skipped)",
                observed, feedback, skipped
            );
        }
    }

    Ok(())
}

/// Run `work` unless `interrupt` fires first; an interrupt is not an error
async fn until_interrupted<W, I>(work: W, interrupt: I) -> Result<()>
where
    W: Future<Output = Result<()>>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = work => result,
        signal = interrupt => {
            signal.context("Failed to listen for shutdown signal")?;
            warn!("Received shutdown signal, persisting learned patterns...");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::new(format!(
        "patternwise={},patternwise_core={}",
        level.as_str().to_lowercase(),
        level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();

    debug!("Patternwise v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli)?;
    let engine = Engine::init(config).await?;

    // Shut down gracefully on ctrl-c so queued state still reaches the backend
    let outcome = until_interrupted(run(&engine, cli.command), tokio::signal::ctrl_c()).await;
    let shutdown = engine.shutdown().await;

    outcome?;
    shutdown.context("Failed to persist pattern store")?;
    Ok(())
}
