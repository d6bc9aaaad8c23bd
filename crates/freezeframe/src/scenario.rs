//! Scenario runner.
//!
//! A scenario walks one isolated browsing context through
//!
//! ```text
//! Created → Navigated → RouteArmed → Interacting → Verified → Captured → Closed
//! ```
//!
//! The page is parked on `about:blank` before routes are armed, so the very
//! first request of the target page is already intercepted. Any failure jumps
//! straight to `Closed` after a best-effort `failure` screenshot; the result
//! carries the error of the step that failed.

use crate::assertion::{Assertion, AssertionRecord, RetryConfig};
use crate::driver::{ContextFactory, ScenarioContext};
use crate::fixture::FixtureResponse;
use crate::locator::{resolve, MatchMode, Target, DEFAULT_TIMEOUT_MS};
use crate::network::{RequestPredicate, RouteSpec};
use crate::result::{FreezeError, FreezeResult};
use crate::wait::{wait_for, WaitCondition};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Page used between context creation and route arming
pub const PARKING_URL: &str = "about:blank";

/// Label of the screenshot taken after verification
pub const FINAL_CAPTURE: &str = "final";

/// Label of the best-effort screenshot taken on failure
pub const FAILURE_CAPTURE: &str = "failure";

// ============================================================================
// Steps and scenarios
// ============================================================================

/// One ordered action of a scenario
#[derive(Debug, Clone)]
pub enum Step {
    /// Navigate to a path relative to the base URL
    Goto(String),
    /// Reload the current document
    Reload,
    /// Replace every route of the context
    ArmRoutes(Vec<RouteSpec>),
    /// Remove the routes registered under a pattern
    ClearRoutes(String),
    /// Click the single element matching a target once it is visible
    Click(Target),
    /// Wait for a DOM condition
    WaitFor(WaitCondition),
    /// Wait until a matching request is being held
    WaitForHeld {
        /// Which request
        predicate: RequestPredicate,
        /// Budget in milliseconds
        timeout_ms: u64,
    },
    /// Answer the earliest matching held request
    FulfillHeld {
        /// Which request
        predicate: RequestPredicate,
        /// What to answer with
        response: FixtureResponse,
    },
    /// Retry an assertion until it passes or its budget runs out
    Assert {
        /// The check
        assertion: Assertion,
        /// Budget in milliseconds
        timeout_ms: u64,
    },
    /// Save a screenshot under a label
    Capture(String),
}

impl Step {
    /// Assertion step with the default budget
    #[must_use]
    pub const fn assert(assertion: Assertion) -> Self {
        Self::Assert {
            assertion,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Held-request wait with the default budget
    #[must_use]
    pub const fn wait_for_held(predicate: RequestPredicate) -> Self {
        Self::WaitForHeld {
            predicate,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Fulfil step
    #[must_use]
    pub const fn fulfill_held(predicate: RequestPredicate, response: FixtureResponse) -> Self {
        Self::FulfillHeld {
            predicate,
            response,
        }
    }

    /// Capture step
    #[must_use]
    pub fn capture(label: impl Into<String>) -> Self {
        Self::Capture(label.into())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Goto(path) => write!(f, "goto {path}"),
            Self::Reload => f.write_str("reload"),
            Self::ArmRoutes(routes) => {
                let patterns: Vec<&str> = routes.iter().map(|r| r.pattern.as_str()).collect();
                write!(f, "arm routes [{}]", patterns.join(", "))
            }
            Self::ClearRoutes(pattern) => write!(f, "clear routes {pattern}"),
            Self::Click(target) => write!(f, "click {target}"),
            Self::WaitFor(condition) => write!(f, "wait for {condition}"),
            Self::WaitForHeld { predicate, .. } => write!(f, "wait for held request ({predicate})"),
            Self::FulfillHeld { predicate, response } => write!(
                f,
                "fulfil held request ({predicate}) with {}",
                response.status()
            ),
            Self::Assert { assertion, .. } => write!(f, "assert {assertion}"),
            Self::Capture(label) => write!(f, "capture {label}"),
        }
    }
}

/// Where a scenario starts
#[derive(Debug, Clone, Default)]
pub struct ScenarioSetup {
    /// Path loaded once routes are armed
    pub path: String,
    /// Routes armed before the first load
    pub routes: Vec<RouteSpec>,
}

impl ScenarioSetup {
    /// Setup loading `path` with no routes
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            routes: Vec::new(),
        }
    }

    /// Add a route
    #[must_use]
    pub fn route(mut self, spec: RouteSpec) -> Self {
        self.routes.push(spec);
        self
    }
}

/// A named, independently runnable sequence of steps
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Unique name, also used for artifact file names
    pub name: String,
    /// One-line summary
    pub description: String,
    /// Start page and initial routes
    pub setup: ScenarioSetup,
    /// Ordered steps
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Create a scenario loading `path`
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            setup: ScenarioSetup::new(path),
            steps: Vec::new(),
        }
    }

    /// Set the description
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Arm a route before the first load
    #[must_use]
    pub fn route(mut self, spec: RouteSpec) -> Self {
        self.setup = self.setup.route(spec);
        self
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

// ============================================================================
// State machine
// ============================================================================

/// Lifecycle of one scenario run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    /// Context opened
    Created,
    /// Page parked on `about:blank`
    Navigated,
    /// Scenario routes registered
    RouteArmed,
    /// Target page loaded, steps running
    Interacting,
    /// Steps done, no faults, no held leaks
    Verified,
    /// Final screenshot saved
    Captured,
    /// Context torn down
    Closed,
}

impl ScenarioState {
    /// The only state reachable on success
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::Navigated),
            Self::Navigated => Some(Self::RouteArmed),
            Self::RouteArmed => Some(Self::Interacting),
            Self::Interacting => Some(Self::Verified),
            Self::Verified => Some(Self::Captured),
            Self::Captured => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Move to `to`. Anything but the next state or `Closed` is rejected.
    pub fn advance(self, to: Self) -> FreezeResult<Self> {
        if self.next() == Some(to) || (to == Self::Closed && self != Self::Closed) {
            Ok(to)
        } else {
            Err(FreezeError::InvalidState {
                message: format!("cannot move scenario from {self} to {to}"),
            })
        }
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Navigated => "navigated",
            Self::RouteArmed => "route-armed",
            Self::Interacting => "interacting",
            Self::Verified => "verified",
            Self::Captured => "captured",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Where and why a scenario failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Step index, `None` for setup and verification phases
    pub index: Option<usize>,
    /// Step or phase description
    pub step: String,
    /// Error kind label
    pub kind: String,
    /// Full error message
    pub error: String,
}

impl StepFailure {
    fn new(index: Option<usize>, step: impl Into<String>, error: &FreezeError) -> Self {
        Self {
            index,
            step: step.into(),
            kind: error.kind().to_string(),
            error: error.to_string(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "step {} ({}): {}: {}", i + 1, self.step, self.kind, self.error),
            None => write!(f, "{}: {}: {}", self.step, self.kind, self.error),
        }
    }
}

/// Outcome of one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario name
    pub name: String,
    /// Whether every step and the final verification passed
    pub passed: bool,
    /// Last state reached before closing
    pub reached: ScenarioState,
    /// Every state entered, in order
    pub transitions: Vec<ScenarioState>,
    /// Screenshot files written
    pub artifacts: Vec<PathBuf>,
    /// Waits and assertions executed
    pub assertions: Vec<AssertionRecord>,
    /// The originating failure
    pub failure: Option<StepFailure>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl ScenarioResult {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            reached: ScenarioState::Created,
            transitions: Vec::new(),
            artifacts: Vec::new(),
            assertions: Vec::new(),
            failure: None,
            duration_ms: 0,
        }
    }

    /// Final state (always `Closed` once the run returned)
    #[must_use]
    pub fn state(&self) -> ScenarioState {
        self.transitions.last().copied().unwrap_or(ScenarioState::Created)
    }

    fn enter(&mut self, to: ScenarioState) -> FreezeResult<()> {
        let from = self.state();
        let to = if self.transitions.is_empty() {
            to
        } else {
            from.advance(to)?
        };
        info!(scenario = %self.name, %from, %to, "state");
        self.transitions.push(to);
        if to != ScenarioState::Closed {
            self.reached = to;
        }
        Ok(())
    }

    fn record(&mut self, description: String, outcome: &FreezeResult<u32>) {
        self.assertions.push(AssertionRecord {
            description,
            passed: outcome.is_ok(),
            attempts: *outcome.as_ref().unwrap_or(&0),
            detail: outcome.as_ref().err().map(ToString::to_string),
        });
    }
}

// ============================================================================
// Artifacts
// ============================================================================

/// Writes screenshots as `<dir>/<scenario>-<label>.png`
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at `dir` (created on first save)
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path an artifact would be written to
    #[must_use]
    pub fn path_for(&self, scenario: &str, label: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.png", sanitize(scenario), sanitize(label)))
    }

    /// Write PNG bytes, replacing any previous file
    pub async fn save(&self, scenario: &str, label: &str, png: &[u8]) -> FreezeResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(scenario, label);
        tokio::fs::write(&path, png).await?;
        debug!(path = %path.display(), bytes = png.len(), "artifact written");
        Ok(path)
    }
}

/// Lowercase, with anything outside `[a-z0-9_-]` replaced by `-`
#[must_use]
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// Runner
// ============================================================================

struct Failure {
    index: Option<usize>,
    step: String,
    error: FreezeError,
}

impl Failure {
    fn phase(step: impl Into<String>, error: FreezeError) -> Self {
        Self {
            index: None,
            step: step.into(),
            error,
        }
    }
}

/// Runs scenarios, one fresh context each
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    factory: Arc<dyn ContextFactory>,
    base_url: Url,
    artifacts: ArtifactStore,
    timeout: Duration,
}

impl ScenarioRunner {
    /// Create a runner against `base_url`, writing artifacts to `output_dir`
    pub fn new(
        factory: Arc<dyn ContextFactory>,
        base_url: &str,
        output_dir: impl Into<PathBuf>,
    ) -> FreezeResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| FreezeError::config(format!("invalid base URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(FreezeError::config(format!("base URL {base_url} cannot hold paths")));
        }
        // Scenario paths resolve below the base path, not against the host root.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            factory,
            base_url,
            artifacts: ArtifactStore::new(output_dir),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        })
    }

    /// Budget for navigation, clicks and held-request fulfilment
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL paths are resolved against
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Artifact store
    #[must_use]
    pub const fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Absolute URL for a scenario path, kept under the base URL's path
    pub fn url_for(&self, path: &str) -> FreezeResult<String> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map(String::from)
            .map_err(|e| FreezeError::config(format!("cannot join {path:?} to {}: {e}", self.base_url)))
    }

    /// Run a scenario assembled from parts
    pub async fn run_scenario(
        &self,
        name: &str,
        setup: ScenarioSetup,
        steps: Vec<Step>,
    ) -> ScenarioResult {
        let scenario = Scenario {
            name: name.to_string(),
            description: String::new(),
            setup,
            steps,
        };
        self.run(&scenario).await
    }

    /// Run every scenario in order
    pub async fn run_all(&self, scenarios: &[Scenario]) -> Vec<ScenarioResult> {
        let mut results = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            results.push(self.run(scenario).await);
        }
        results
    }

    /// Run one scenario to `Closed`. Never panics on scenario failure.
    pub async fn run(&self, scenario: &Scenario) -> ScenarioResult {
        let start = Instant::now();
        let mut result = ScenarioResult::new(&scenario.name);
        info!(scenario = %scenario.name, steps = scenario.steps.len(), "scenario started");

        let context = match self.factory.open_context().await {
            Ok(context) => context,
            Err(e) => {
                result.failure = Some(StepFailure::new(None, "open context", &e));
                result.transitions.push(ScenarioState::Closed);
                result.duration_ms = start.elapsed().as_millis() as u64;
                warn!(scenario = %scenario.name, error = %e, "could not open context");
                return result;
            }
        };

        let outcome = match result.enter(ScenarioState::Created) {
            Ok(()) => self.drive(&context, scenario, &mut result).await,
            Err(e) => Err(Failure::phase("open context", e)),
        };

        match outcome {
            Ok(()) => match context.page.close().await {
                Ok(()) => result.passed = true,
                Err(e) => result.failure = Some(StepFailure::new(None, "close", &e)),
            },
            Err(failure) => {
                warn!(
                    scenario = %scenario.name,
                    step = %failure.step,
                    error = %failure.error,
                    "scenario failed"
                );
                result.failure = Some(StepFailure::new(failure.index, failure.step, &failure.error));
                self.salvage(&context, &scenario.name, &mut result).await;
            }
        }

        if let Err(e) = result.enter(ScenarioState::Closed) {
            warn!(scenario = %scenario.name, error = %e, "unexpected state");
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            scenario = %scenario.name,
            passed = result.passed,
            duration_ms = result.duration_ms,
            "scenario finished"
        );
        result
    }

    async fn drive(
        &self,
        context: &ScenarioContext,
        scenario: &Scenario,
        result: &mut ScenarioResult,
    ) -> Result<(), Failure> {
        let page = context.page.as_ref();
        let interceptor = &context.interceptor;

        page.goto(PARKING_URL, self.timeout)
            .await
            .map_err(|e| Failure::phase("park on about:blank", e))?;
        result
            .enter(ScenarioState::Navigated)
            .map_err(|e| Failure::phase("navigate", e))?;

        interceptor
            .arm(&scenario.setup.routes)
            .map_err(|e| Failure::phase("arm routes", e))?;
        result
            .enter(ScenarioState::RouteArmed)
            .map_err(|e| Failure::phase("arm routes", e))?;

        let target = self
            .url_for(&scenario.setup.path)
            .map_err(|e| Failure::phase("load target", e))?;
        page.goto(&target, self.timeout)
            .await
            .map_err(|e| Failure::phase(format!("load {target}"), e))?;
        result
            .enter(ScenarioState::Interacting)
            .map_err(|e| Failure::phase("load target", e))?;

        for (index, step) in scenario.steps.iter().enumerate() {
            debug!(scenario = %scenario.name, index, step = %step, "step");
            let outcome = self
                .execute(context, &scenario.name, step, result)
                .await
                .and_then(|()| interceptor.check_faults());
            if let Err(error) = outcome {
                return Err(Failure {
                    index: Some(index),
                    step: step.to_string(),
                    error,
                });
            }
        }

        interceptor
            .settle(self.timeout)
            .await
            .map_err(|e| Failure::phase("settle deliveries", e))?;
        interceptor.verify().map_err(|e| Failure::phase("verify", e))?;
        result
            .enter(ScenarioState::Verified)
            .map_err(|e| Failure::phase("verify", e))?;

        let png = page
            .screenshot()
            .await
            .map_err(|e| Failure::phase("final capture", e))?;
        let path = self
            .artifacts
            .save(&scenario.name, FINAL_CAPTURE, &png)
            .await
            .map_err(|e| Failure::phase("final capture", e))?;
        result.artifacts.push(path);
        result
            .enter(ScenarioState::Captured)
            .map_err(|e| Failure::phase("final capture", e))
    }

    async fn execute(
        &self,
        context: &ScenarioContext,
        scenario: &str,
        step: &Step,
        result: &mut ScenarioResult,
    ) -> FreezeResult<()> {
        let page = context.page.as_ref();
        let interceptor = &context.interceptor;
        match step {
            Step::Goto(path) => page.goto(&self.url_for(path)?, self.timeout).await,
            Step::Reload => page.reload(self.timeout).await,
            Step::ArmRoutes(routes) => interceptor.arm(routes),
            Step::ClearRoutes(pattern) => {
                let removed = interceptor.clear_route(pattern);
                debug!(pattern = %pattern, removed, "routes cleared");
                Ok(())
            }
            Step::Click(target) => {
                Assertion::visible(target.clone())
                    .verify(page, RetryConfig::new(self.timeout))
                    .await?;
                let element = resolve(page, target, MatchMode::Strict).await?;
                page.click(&element).await
            }
            Step::WaitFor(condition) => {
                let outcome = wait_for(page, condition).await.map(|o| o.attempts);
                result.record(format!("wait for {condition}"), &outcome);
                outcome.map(|_| ())
            }
            Step::WaitForHeld {
                predicate,
                timeout_ms,
            } => interceptor
                .next_held(predicate, Duration::from_millis(*timeout_ms))
                .await
                .map(|_| ()),
            Step::FulfillHeld {
                predicate,
                response,
            } => {
                let handle = interceptor.next_held(predicate, self.timeout).await?;
                let delivery = interceptor.fulfill(handle, response.clone())?;
                debug!(%handle, url = %delivery.url(), "held request released");
                Ok(())
            }
            Step::Assert {
                assertion,
                timeout_ms,
            } => {
                let retry = RetryConfig::new(Duration::from_millis(*timeout_ms));
                let outcome = assertion.verify(page, retry).await;
                result.record(assertion.to_string(), &outcome);
                outcome.map(|_| ())
            }
            Step::Capture(label) => {
                let png = page.screenshot().await?;
                let path = self.artifacts.save(scenario, label, &png).await?;
                result.artifacts.push(path);
                Ok(())
            }
        }
    }

    /// Failure path: screenshot, drop held requests, close
    async fn salvage(&self, context: &ScenarioContext, scenario: &str, result: &mut ScenarioResult) {
        match context.page.screenshot().await {
            Ok(png) => match self.artifacts.save(scenario, FAILURE_CAPTURE, &png).await {
                Ok(path) => result.artifacts.push(path),
                Err(e) => warn!(scenario, error = %e, "failure screenshot not written"),
            },
            Err(e) => warn!(scenario, error = %e, "failure screenshot not taken"),
        }

        let abandoned = context.interceptor.abandon_pending();
        if abandoned > 0 {
            debug!(scenario, abandoned, "held requests aborted");
        }
        for fault in context.interceptor.take_faults() {
            debug!(scenario, error = %fault, "fault after failure");
        }
        if let Err(e) = context.page.close().await {
            warn!(scenario, error = %e, "context close failed");
        }
    }
}
