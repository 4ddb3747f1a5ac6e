use anyhow::{Context, Result};
use clap::Parser;
use refactor_swarm::config::Config;
use refactor_swarm::experiment::{ActionType, ExperimentLog, ExperimentRecord, Status};
use refactor_swarm::llm::OpenRouterClient;
use refactor_swarm::report::{StopReason, SwarmOutcome};
use refactor_swarm::swarm::{Swarm, SwarmOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const SYSTEM_NAME: &str = "System";
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "refactor-swarm",
    about = "Audit, fix and test a Python codebase with LLM agents until its tests pass",
    version
)]
struct Cli {
    /// Directory holding the Python code to refactor
    #[arg(long = "target_dir")]
    target_dir: PathBuf,

    /// Maximum audit/fix/test rounds (default: 10)
    #[arg(long = "max_iterations")]
    max_iterations: Option<usize>,

    /// Model id sent to the chat completions endpoint
    #[arg(long)]
    model: Option<String>,

    /// Generate missing test_<name>.py files in the first round
    #[arg(long = "generate_tests")]
    generate_tests: bool,

    /// Generate missing README_<name>.md files after a successful run
    #[arg(long = "generate_docs")]
    generate_docs: bool,

    /// Disable test and documentation generation, including when enabled in the config
    #[arg(long = "no_generation", conflicts_with_all = ["generate_tests", "generate_docs"])]
    no_generation: bool,

    /// Config file (default: ~/.config/refactor-swarm/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Experiment log (default: logs/experiment_data.json)
    #[arg(long = "log_file")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(max) = self.max_iterations {
            config.max_iterations = max;
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = log_file.clone();
        }
        config.generate_tests |= self.generate_tests;
        config.generate_docs |= self.generate_docs;
        if self.no_generation {
            config.generate_tests = false;
            config.generate_docs = false;
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let config = match prepare(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&cli, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Config with CLI overrides applied and validated; checks the target and credentials.
fn prepare(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;
    if !cli.target_dir.is_dir() {
        anyhow::bail!("Target directory not found: {}", cli.target_dir.display());
    }
    config.api_key()?;
    Ok(config)
}

async fn run(cli: &Cli, config: Config) -> Result<ExitCode> {
    let api_key = config.api_key()?;
    let target = cli
        .target_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", cli.target_dir.display()))?;
    let log = ExperimentLog::new(&config.log_file);

    print_banner(&target, &config);
    log.log(
        ExperimentRecord::new(SYSTEM_NAME, "N/A", ActionType::Analysis, Status::Success)
            .detail("input_prompt", format!("Start on {}", target.display()))
            .detail(
                "output_response",
                format!(
                    "Starting with model={}, max_iterations={}",
                    config.model, config.max_iterations
                ),
            )
            .detail("target_directory", target.display().to_string())
            .detail("max_iterations", config.max_iterations)
            .detail("model_used", &config.model)
            .detail("generate_tests", config.generate_tests)
            .detail("generate_docs", config.generate_docs),
    );

    let llm = Arc::new(
        OpenRouterClient::new(&config.api_base_url, api_key, config.model.clone())
            .with_max_tokens(config.max_tokens),
    );
    let swarm = Swarm::new(
        llm,
        Arc::new(config.tools.linter()),
        Arc::new(config.tools.test_harness()),
        &config.prompts(),
        log.clone(),
        SwarmOptions {
            max_iterations: config.max_iterations,
            generate_tests: config.generate_tests,
            generate_docs: config.generate_docs,
            quality_threshold: config.quality_threshold,
        },
    );

    let outcome = tokio::select! {
        outcome = swarm.run(&target) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            println!();
            println!("  Interrupted (Ctrl+C). Details in {}", log.path().display());
            log.log(interruption_record(&config.model, &target));
            exit_interrupted();
        }
    };

    print_report(&outcome, config.max_iterations);
    let (action, status, summary) = if outcome.success {
        (
            ActionType::Analysis,
            Status::Success,
            format!("Succeeded in {} iterations", outcome.total_iterations),
        )
    } else {
        (
            ActionType::Debug,
            Status::Failure,
            format!("Failed after {} iterations", outcome.total_iterations),
        )
    };
    log.log(
        ExperimentRecord::new(SYSTEM_NAME, &config.model, action, status)
            .detail("input_prompt", "Final report")
            .detail("output_response", summary)
            .detail("success", outcome.success)
            .detail("total_iterations", outcome.total_iterations)
            .detail("max_iterations_reached", outcome.max_iterations_reached)
            .detail("stop_reason", &outcome.stop_reason)
            .detail("history", &outcome.history),
    );
    println!("  Experiment log: {}", log.path().display());

    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn interruption_record(model: &str, target: &std::path::Path) -> ExperimentRecord {
    ExperimentRecord::new(SYSTEM_NAME, model, ActionType::Debug, Status::Failure)
        .detail("input_prompt", format!("Run on {}", target.display()))
        .detail("output_response", "Interrupted by user")
        .detail("interruption", "ctrl_c")
        .detail("exit_code", EXIT_INTERRUPTED)
}

/// Exit at once: a lint or test subprocess still running on the blocking pool
/// would otherwise hold runtime shutdown until its timeout.
fn exit_interrupted() -> ! {
    let _ = std::io::stdout().flush();
    std::process::exit(EXIT_INTERRUPTED);
}

fn print_banner(target: &std::path::Path, config: &Config) {
    let on_off = |flag: bool| if flag { "on" } else { "off" };
    println!("{}", "=".repeat(72));
    println!("  REFACTOR SWARM");
    println!("{}", "=".repeat(72));
    println!("  Target         : {}", target.display());
    println!("  Model          : {}", config.model);
    println!("  Max iterations : {}", config.max_iterations);
    println!("  Test generation: {}", on_off(config.generate_tests));
    println!("  Docs generation: {}", on_off(config.generate_docs));
    println!("{}", "=".repeat(72));
}

fn print_report(outcome: &SwarmOutcome, max_iterations: usize) {
    println!();
    println!("{}", "=".repeat(72));
    println!("  FINAL REPORT");
    println!("{}", "=".repeat(72));

    if outcome.success {
        println!(
            "  + All tests pass after {} iteration(s)",
            outcome.total_iterations
        );
    } else {
        println!("  - Incomplete after {} iteration(s)", outcome.total_iterations);
        match &outcome.stop_reason {
            StopReason::IterationLimit => {
                println!("    Reason: iteration limit reached ({})", max_iterations)
            }
            StopReason::EmptyTarget => println!("    Reason: no Python files in the target"),
            StopReason::Error(message) => println!("    Reason: error: {}", message),
            StopReason::Success => {}
        }
    }

    if !outcome.tests_generated.is_empty() {
        println!("  Tests generated: {}", outcome.tests_generated.join(", "));
    }
    if !outcome.docs_generated.is_empty() {
        println!("  Docs generated : {}", outcome.docs_generated.join(", "));
    }
    if let Some(quality) = &outcome.quality {
        println!(
            "  Lint average   : {:.2}/10 (threshold {:.2}, {})",
            quality.average_score,
            quality.threshold,
            if quality.passed { "met" } else { "not met" }
        );
    }

    println!();
    println!("  Per-iteration statistics:");
    for record in &outcome.history {
        println!(
            "    #{:<3} issues {:>3}  fixes {:>3}  passed {:>3}  failed {:>3}",
            record.iteration,
            record.issues_detected,
            record.fixes_applied,
            record.tests_passed,
            record.tests_failed
        );
    }
    println!("{}", "=".repeat(72));
}
