//! Freezeframe CLI
//!
//! ## Usage
//!
//! ```bash
//! freezeframe list                          # Show built-in scenarios
//! freezeframe run                           # Run all of them
//! freezeframe run creating-state --headed   # Watch one run
//! freezeframe run --format json > report.json
//! ```

use clap::Parser;
use freezeframe::catalog;
use freezeframe_cli::{
    execute, load_profile, Cli, CliConfig, CliError, CliResult, ColorChoice, Commands, ListArgs,
    OutputFormat, Printer, RunArgs, RunPlan, Verbosity,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_tracing(&config);

    match run(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::ScenariosFailed { .. }) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let color: ColorChoice = cli.color.clone().into();
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(color)
}

fn init_tracing(config: &CliConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.verbosity.log_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(config.color.should_color_stderr())
        .with_target(false)
        .try_init();
}

fn run(cli: Cli, config: &CliConfig) -> CliResult<()> {
    match cli.command {
        Commands::List(args) => run_list(config, &args),
        Commands::Run(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_scenarios(config, &args))
        }
    }
}

fn run_list(config: &CliConfig, args: &ListArgs) -> CliResult<()> {
    let profile = load_profile(args.profile.as_deref())?;
    let scenarios = catalog(&profile)?;
    let printer = Printer::new(config.color.should_color(), false);
    print!("{}", printer.scenario_list(&scenarios));
    Ok(())
}

async fn run_scenarios(config: &CliConfig, args: &RunArgs) -> CliResult<()> {
    let plan = RunPlan::from_args(args)?;
    let format: OutputFormat = args.format.into();
    let printer = Printer::new(config.color.should_color(), config.verbosity.is_quiet());

    if format == OutputFormat::Text && !config.verbosity.is_quiet() {
        println!(
            "Running {} scenario(s) against {}",
            plan.scenarios.len(),
            plan.base_url
        );
    }

    let report = execute(&plan, |result| {
        if format == OutputFormat::Text {
            print!("{}", printer.result(result));
        }
    })
    .await?;

    match format {
        OutputFormat::Text => print!("{}", printer.summary(&report)),
        OutputFormat::Json => println!("{}", report.render_json()?),
    }
    if let Some(path) = &args.report {
        report.write_json(path)?;
    }

    if report.all_passed() {
        Ok(())
    } else {
        Err(CliError::ScenariosFailed {
            failed: report.failed_count(),
            total: report.results.len(),
        })
    }
}
