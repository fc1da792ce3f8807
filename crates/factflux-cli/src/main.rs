use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use factflux_core::{
    Config, ConfigLoader, CredentialInputs, EventCollector, LiveBackends, ProgressEvent,
    SessionRequest, TelemetryOptions, init_metrics_from_env, init_telemetry, redact, run_session,
    write_report,
};
use inquire::{InquireError, Password, PasswordDisplayMode};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "factflux",
    version,
    about = "Research a topic on the web, then elaborate the findings into a full report"
)]
struct Cli {
    /// Path to a TOML config file (defaults to $FACTFLUX_CONFIG, then ./factflux.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research a topic and write the enhanced report.
    Run(RunArgs),
    /// Validate configuration and report which credentials are available.
    Check,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Research topic, e.g. "Latest developments in AI".
    #[arg(long)]
    topic: String,

    /// Directory the markdown report is written to.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// OpenAI API key; overrides the environment.
    #[arg(long)]
    openai_key: Option<String>,

    /// Firecrawl API key; overrides the environment.
    #[arg(long)]
    firecrawl_key: Option<String>,

    /// Fail instead of prompting when a key is missing.
    #[arg(long)]
    no_prompt: bool,

    /// Print the initial research report before the enhanced one.
    #[arg(long)]
    print_initial: bool,

    /// Print the run trace to stderr after the report.
    #[arg(long)]
    explain: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", redact(&format!("{err:#}")));
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    let config = ConfigLoader::load(cli.config)?;

    init_telemetry(TelemetryOptions {
        env_filter: None,
        default_level: format!("warn,factflux_core={}", config.logging.level),
        with_ansi: std::io::stderr().is_terminal(),
    })?;
    init_metrics_from_env("factflux-cli");

    match cli.command {
        Command::Run(args) => {
            let rt = Runtime::new()?;
            rt.block_on(run_command(args, config))
        }
        Command::Check => check_command(&config),
    }
}

async fn run_command(args: RunArgs, config: Config) -> Result<()> {
    let interactive = !args.no_prompt && std::io::stdin().is_terminal();
    let credentials = gather_credentials(&args, &config, interactive, &mut prompt_secret)?;
    let request = SessionRequest::new(args.topic.clone(), credentials);

    info!(topic = %args.topic, "starting research run");

    let (collector, receiver) = EventCollector::new();
    let printer = tokio::spawn(print_progress(receiver));

    let result = run_session(&request, &config, &LiveBackends, collector).await;
    // Every sender is gone once the run returns, so the printer drains and exits.
    let _ = printer.await;
    let outcome = result?;

    if args.print_initial {
        println!("## Initial Research Report\n\n{}\n", outcome.initial_report);
    }
    println!("## Enhanced Research Report\n\n{}", outcome.enhanced_report);
    if args.explain {
        eprintln!("\n{}", outcome.explain_markdown());
    }

    let path = write_report(&args.output_dir, &outcome.topic, &outcome.enhanced_report)?;
    eprintln!(
        "report written to {} ({} ms)",
        path.display(),
        outcome.duration_ms
    );
    Ok(())
}

async fn print_progress(mut receiver: UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = receiver.recv().await {
        eprintln!("{}", event.display_line());
    }
}

/// Explicit flags first, then the environment, then (when interactive) a masked prompt.
fn gather_credentials(
    args: &RunArgs,
    config: &Config,
    interactive: bool,
    prompt: &mut dyn FnMut(&str) -> Result<String>,
) -> Result<CredentialInputs> {
    let mut inputs = CredentialInputs::new(args.openai_key.clone(), args.firecrawl_key.clone())
        .or(config.credentials_from_env());

    if inputs.is_complete() || !interactive {
        return Ok(inputs);
    }

    let (llm_name, research_name) = config.credential_names();
    if is_blank(&inputs.llm_api_key) {
        inputs.llm_api_key = Some(prompt(llm_name)?);
    }
    if is_blank(&inputs.research_api_key) {
        inputs.research_api_key = Some(prompt(research_name)?);
    }
    Ok(inputs)
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn prompt_secret(name: &str) -> Result<String> {
    match Password::new(&format!("{name}:"))
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .with_help_message("not stored; used for this run only")
        .prompt()
    {
        Ok(value) => Ok(value),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
            Err(anyhow!("{name} entry cancelled"))
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {name}")),
    }
}

fn check_command(config: &Config) -> Result<()> {
    println!(
        "llm:      {} (model {})",
        config.llm.provider, config.llm.model
    );
    println!(
        "research: {} (depth {}, {}s, {} urls)",
        config.research.provider,
        config.research.max_depth,
        config.research.time_limit_secs,
        config.research.max_urls
    );

    let available = config.credentials_from_env();
    let (llm_name, research_name) = config.credential_names();
    let mut missing = Vec::new();
    for (name, value) in [
        (llm_name, &available.llm_api_key),
        (research_name, &available.research_api_key),
    ] {
        if is_blank(value) {
            println!("{name}: missing");
            missing.push(name);
        } else {
            println!("{name}: set");
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "missing credentials: {} (pass them as flags or enter them when prompted)",
            missing.join(", ")
        ))
    }
}
