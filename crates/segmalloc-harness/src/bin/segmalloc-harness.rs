//! CLI entrypoint for the segmalloc challenge harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use segmalloc_core::{CoalescePolicy, Heap, HeapConfig, SafetyLevel};
use segmalloc_harness::structured_log::{LogEmitter, validate_log_file};
use segmalloc_harness::{ChallengeSpec, Runner};

/// Malloc challenge tooling for segmalloc.
#[derive(Debug, Parser)]
#[command(name = "segmalloc-harness")]
#[command(about = "Run malloc challenge workloads against segmalloc")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct HeapArgs {
    /// Safety mode (`strict` or `hardened`).
    #[arg(long, default_value = "strict")]
    mode: String,
    /// Coalescing policy (`adjacent` or `off`).
    #[arg(long, default_value = "adjacent")]
    coalesce: String,
    /// Return fully free pages to the page source.
    #[arg(long)]
    release_empty: bool,
}

impl HeapArgs {
    fn config(&self) -> HeapConfig {
        HeapConfig::default()
            .with_safety(SafetyLevel::from_str_loose(&self.mode))
            .with_coalesce(CoalescePolicy::from_str_loose(&self.coalesce))
            .with_release_empty_pages(self.release_empty)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run challenges and print utilization and elapsed time.
    Run {
        /// Challenge number or name; repeat to select several (default: all).
        #[arg(long = "challenge")]
        challenges: Vec<String>,
        #[command(flatten)]
        heap: HeapArgs,
        /// Workload seed (decimal or 0x...).
        #[arg(long, default_value = "0x5E6_A110C")]
        seed: String,
        /// Override the epoch count of every challenge.
        #[arg(long)]
        epochs: Option<usize>,
        /// Check heap integrity every N epochs.
        #[arg(long)]
        verify_every: Option<usize>,
        /// Output format: `plain` (default) or `json`.
        #[arg(long, default_value = "plain")]
        format: String,
        /// Output file path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Run one challenge with heap lifecycle logging and write the JSONL trace.
    Trace {
        /// Challenge number or name.
        #[arg(long)]
        challenge: String,
        #[command(flatten)]
        heap: HeapArgs,
        #[arg(long, default_value = "0x5E6_A110C")]
        seed: String,
        /// Epochs to run (traces grow quickly).
        #[arg(long, default_value_t = 20)]
        epochs: usize,
        /// JSONL output path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        #[arg(long)]
        input: PathBuf,
    },
}

fn parse_seed(raw: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let cleaned = raw.trim().replace('_', "");
    let seed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => cleaned.parse()?,
    };
    Ok(seed)
}

fn run_id(seed: u64) -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("run-{secs}-{seed:x}")
}

#[cfg(unix)]
fn page_source() -> segmalloc_core::MmapPageSource {
    segmalloc_core::MmapPageSource
}

#[cfg(not(unix))]
fn page_source() -> segmalloc_core::SystemPageSource {
    segmalloc_core::SystemPageSource
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            challenges,
            heap,
            seed,
            epochs,
            verify_every,
            format,
            output,
            log,
        } => {
            let seed = parse_seed(&seed)?;
            let mut specs = if challenges.is_empty() {
                ChallengeSpec::all().to_vec()
            } else {
                challenges
                    .iter()
                    .map(|c| ChallengeSpec::parse(c))
                    .collect::<Result<Vec<_>, _>>()?
            };
            if let Some(epochs) = epochs {
                specs = specs.into_iter().map(|s| s.with_epochs(epochs)).collect();
            }

            let run_id = run_id(seed);
            let mut runner = Runner::new(run_id.clone(), seed);
            if let Some(every) = verify_every {
                runner = runner.with_verify_every(every);
            }
            let mut emitter = match &log {
                Some(path) => Some(LogEmitter::to_file(path, &run_id)?),
                None => None,
            };

            let mut heap = Heap::with_config(page_source(), heap.config());
            let report = runner.run_suite(&mut heap, &specs, emitter.as_mut())?;

            let rendered = match format.as_str() {
                "json" => report.to_json()?,
                "plain" => report.render_plain(),
                other => return Err(format!("unsupported format `{other}`").into()),
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    eprintln!("Wrote report to {}", path.display());
                }
                None => print!("{rendered}"),
            }
        }
        Command::Trace {
            challenge,
            heap,
            seed,
            epochs,
            output,
        } => {
            let seed = parse_seed(&seed)?;
            let spec = ChallengeSpec::parse(&challenge)?.with_epochs(epochs);
            let run_id = run_id(seed);
            let mut emitter = match &output {
                Some(path) => LogEmitter::to_file(path, &run_id)?,
                None => LogEmitter::to_stdout(&run_id),
            };

            let config = heap.config().with_lifecycle_logging(true);
            let mut heap = Heap::with_config(page_source(), config);
            let result = Runner::new(run_id, seed)
                .with_verify_every(1)
                .run_challenge(&mut heap, &spec, Some(&mut emitter))?;
            emitter.flush()?;
            eprintln!(
                "challenge #{} ({}): {:.1}% utilization, {} pages",
                result.challenge, result.name, result.utilization_percent, result.pages_acquired
            );
        }
        Command::ValidateLog { input } => {
            let (valid, errors) = validate_log_file(&input)?;
            for err in &errors {
                eprintln!("{err}");
            }
            eprintln!("{valid} valid lines, {} errors", errors.len());
            if !errors.is_empty() {
                return Err(format!("{} invalid log lines in {}", errors.len(), input.display()).into());
            }
        }
    }

    Ok(())
}
