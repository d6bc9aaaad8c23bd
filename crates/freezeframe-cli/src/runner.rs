//! Scenario execution for the `run` command

use crate::commands::RunArgs;
use crate::error::{CliError, CliResult};
use freezeframe::{select, BrowserConfig, CasesProfile, Report, Scenario, ScenarioResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Everything needed to run, resolved before any browser is launched
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Scenarios in run order
    pub scenarios: Vec<Scenario>,
    /// Application base URL
    pub base_url: String,
    /// Screenshot directory
    pub output_dir: PathBuf,
    /// Navigation and fulfilment budget
    pub timeout: Duration,
    /// Chromium settings
    pub browser: BrowserConfig,
}

/// Load a profile, or the defaults when no path is given
pub fn load_profile(path: Option<&Path>) -> CliResult<CasesProfile> {
    match path {
        Some(path) => CasesProfile::load(path).map_err(|e| {
            CliError::config(format!("cannot load profile {}: {e}", path.display()))
        }),
        None => Ok(CasesProfile::default()),
    }
}

impl RunPlan {
    /// Resolve profile, scenario names and browser settings
    pub fn from_args(args: &RunArgs) -> CliResult<Self> {
        let mut profile = load_profile(args.profile.as_deref())?;
        if let Some(timeout_ms) = args.timeout_ms {
            profile = profile.with_timeout(timeout_ms);
        }
        let scenarios = select(&profile, &args.scenarios)?;

        let mut browser = BrowserConfig::default().with_headless(!args.headed);
        if args.no_sandbox {
            browser = browser.with_no_sandbox();
        }
        if let Some(path) = &args.chromium_path {
            browser = browser.with_chromium_path(path);
        }

        Ok(Self {
            scenarios,
            base_url: args.base_url.clone(),
            output_dir: args.output_dir.clone(),
            timeout: Duration::from_millis(profile.timeout_ms),
            browser,
        })
    }
}

/// Launch Chromium and run the plan, reporting each result as it finishes
#[cfg(feature = "browser")]
pub async fn execute(plan: &RunPlan, mut on_result: impl FnMut(&ScenarioResult)) -> CliResult<Report> {
    use freezeframe::{ChromiumSession, ContextFactory, ScenarioRunner};
    use std::sync::Arc;

    let session = Arc::new(ChromiumSession::launch(plan.browser.clone()).await?);
    let runner = ScenarioRunner::new(
        Arc::clone(&session) as Arc<dyn ContextFactory>,
        &plan.base_url,
        &plan.output_dir,
    )?
    .with_timeout(plan.timeout);

    let mut report = Report::new("cases", &plan.base_url);
    for scenario in &plan.scenarios {
        let result = runner.run(scenario).await;
        on_result(&result);
        report.record(result);
    }
    drop(runner);

    if let Ok(session) = Arc::try_unwrap(session) {
        session.close().await?;
    }
    info!(summary = %report.summary(), "run finished");
    Ok(report)
}

/// Without browser support there is nothing to drive
#[cfg(not(feature = "browser"))]
pub async fn execute(plan: &RunPlan, _on_result: impl FnMut(&ScenarioResult)) -> CliResult<Report> {
    info!(scenarios = plan.scenarios.len(), "browser support not compiled in");
    Err(CliError::config(
        "this build has no browser support; rebuild freezeframe-cli with --features browser",
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use clap::Parser;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["freezeframe", "run"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            Commands::List(_) => panic!("expected run"),
        }
    }

    mod plan_tests {
        use super::*;

        #[test]
        fn test_all_scenarios_by_default() {
            let plan = RunPlan::from_args(&run_args(&[])).unwrap();
            assert_eq!(plan.scenarios.len(), freezeframe::SCENARIO_NAMES.len());
            assert!(plan.browser.headless);
            assert_eq!(plan.timeout, Duration::from_millis(5000));
        }

        #[test]
        fn test_selection_and_overrides() {
            let plan = RunPlan::from_args(&run_args(&[
                "error-state",
                "--timeout-ms",
                "1500",
                "--headed",
                "--chromium-path",
                "/opt/chromium",
            ]))
            .unwrap();
            assert_eq!(plan.scenarios.len(), 1);
            assert_eq!(plan.scenarios[0].name, "error-state");
            assert_eq!(plan.timeout, Duration::from_millis(1500));
            assert!(!plan.browser.headless);
            assert_eq!(plan.browser.chromium_path.as_deref(), Some("/opt/chromium"));
        }

        #[test]
        fn test_unknown_scenario() {
            let err = RunPlan::from_args(&run_args(&["bogus"])).unwrap_err();
            assert!(err.to_string().contains("unknown scenario"));
        }

        #[test]
        fn test_profile_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("profile.yaml");
            std::fs::write(&path, "timeout_ms: 800\ncases_path: /patients\n").unwrap();
            let plan = RunPlan::from_args(&run_args(&["--profile", path.to_str().unwrap()])).unwrap();
            assert_eq!(plan.timeout, Duration::from_millis(800));
            assert_eq!(plan.scenarios[0].setup.path, "/patients");
        }

        #[test]
        fn test_missing_profile() {
            let err = load_profile(Some(Path::new("/nonexistent/profile.yaml"))).unwrap_err();
            assert!(matches!(err, CliError::Config { .. }));
        }
    }
}
