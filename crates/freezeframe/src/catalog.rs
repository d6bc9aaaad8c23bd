//! Built-in scenarios for the patient cases page.
//!
//! Every label, selector and path comes from a [`CasesProfile`], so the same
//! catalogue can be pointed at another deployment with a YAML file:
//!
//! ```yaml
//! cases_path: /cases
//! creating_label: "Creating..."
//! create_delay_ms: 250
//! ```

use crate::assertion::Assertion;
use crate::fixture::{CaseFixtures, CaseRecord, FixtureResponse};
use crate::locator::{NameMatch, Target};
use crate::network::{HttpMethod, RequestPredicate, RouteHandler, RouteSpec};
use crate::result::{FreezeError, FreezeResult};
use crate::scenario::{Scenario, Step};
use crate::wait::WaitCondition;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Names of the built-in scenarios, in run order
pub const SCENARIO_NAMES: &[&str] = &[
    "empty-state",
    "loading-state",
    "list-state",
    "creating-state",
    "open-case-link",
    "error-state",
];

/// Paths, labels and fixture timings of the page under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CasesProfile {
    /// Page path
    pub cases_path: String,
    /// Glob of the cases collection endpoint
    pub api_pattern: String,
    /// Page heading
    pub page_heading: String,
    /// Empty-state text
    pub empty_text: String,
    /// Loading indicator selector
    pub spinner_selector: String,
    /// Accessible name of the create button
    pub create_button_name: String,
    /// Button label while a create is in flight
    pub creating_label: String,
    /// Button label when idle
    pub idle_label: String,
    /// Accessible-name prefix of per-case links
    pub open_case_prefix: String,
    /// Visible text of per-case links
    pub open_case_text: String,
    /// Heading of the error panel
    pub error_heading: String,
    /// Message carried by the error fixture
    pub error_message: String,
    /// Case codes served by the list fixture
    pub list_codes: Vec<String>,
    /// Case code used for the link-name scenario
    pub linked_case_code: String,
    /// Budget for every wait and assertion
    pub timeout_ms: u64,
    /// Delay before list responses are delivered
    pub list_delay_ms: u64,
    /// Delay before create responses are delivered
    pub create_delay_ms: u64,
}

impl Default for CasesProfile {
    fn default() -> Self {
        Self {
            cases_path: "/cases".to_string(),
            api_pattern: "**/api/cases".to_string(),
            page_heading: "Patient Cases".to_string(),
            empty_text: "No cases yet".to_string(),
            spinner_selector: ".animate-spin".to_string(),
            create_button_name: "Create new patient case".to_string(),
            creating_label: "Creating...".to_string(),
            idle_label: "New Case".to_string(),
            open_case_prefix: "Open case ".to_string(),
            open_case_text: "Open Case".to_string(),
            error_heading: "Database Error".to_string(),
            error_message: "Failed to connect to database".to_string(),
            list_codes: vec!["CASE-123".to_string(), "CASE-456".to_string()],
            linked_case_code: "AWM-2025-0001".to_string(),
            timeout_ms: 5000,
            list_delay_ms: 0,
            create_delay_ms: 0,
        }
    }
}

impl CasesProfile {
    /// Parse a YAML profile; missing keys keep their defaults
    pub fn from_yaml(yaml: &str) -> FreezeResult<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Load a YAML profile from disk
    pub fn load(path: &Path) -> FreezeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Override the wait budget
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn create_button(&self) -> Target {
        Target::role("button", &self.create_button_name)
    }

    fn case_links(&self) -> Target {
        Target::role_matching("link", NameMatch::Prefix(self.open_case_prefix.clone()))
    }

    fn list_route(&self, response: FixtureResponse) -> RouteSpec {
        RouteSpec::new(
            &self.api_pattern,
            RouteHandler::respond(response.with_delay(self.list_delay_ms)),
        )
        .method(HttpMethod::Get)
        .expect_at_least(1)
    }

    fn wait(&self, condition: WaitCondition) -> Step {
        Step::WaitFor(condition.with_timeout(self.timeout_ms))
    }

    fn check(&self, assertion: Assertion) -> Step {
        Step::Assert {
            assertion,
            timeout_ms: self.timeout_ms,
        }
    }

    fn held(&self, method: HttpMethod) -> Step {
        Step::WaitForHeld {
            predicate: RequestPredicate::Method(method),
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Every built-in scenario
pub fn catalog(profile: &CasesProfile) -> FreezeResult<Vec<Scenario>> {
    Ok(vec![
        empty_state(profile)?,
        loading_state(profile)?,
        list_state(profile)?,
        creating_state(profile)?,
        open_case_link(profile)?,
        error_state(profile),
    ])
}

/// Scenarios by name, all of them when `names` is empty
pub fn select(profile: &CasesProfile, names: &[String]) -> FreezeResult<Vec<Scenario>> {
    let all = catalog(profile)?;
    if names.is_empty() {
        return Ok(all);
    }
    names
        .iter()
        .map(|name| {
            all.iter().find(|s| &s.name == name).cloned().ok_or_else(|| {
                FreezeError::config(format!(
                    "unknown scenario {name:?} (available: {})",
                    SCENARIO_NAMES.join(", ")
                ))
            })
        })
        .collect()
}

fn empty_state(p: &CasesProfile) -> FreezeResult<Scenario> {
    Ok(Scenario::new("empty-state", &p.cases_path)
        .describe("Empty list shows the empty-state message and no case links")
        .route(p.list_route(CaseFixtures::empty_list()?))
        .step(p.wait(WaitCondition::visible(Target::text(&p.empty_text))))
        .step(p.check(Assertion::count(p.case_links(), 0)))
        .step(Step::capture("empty")))
}

fn loading_state(p: &CasesProfile) -> FreezeResult<Scenario> {
    let spinner = Target::css(&p.spinner_selector);
    Ok(Scenario::new("loading-state", &p.cases_path)
        .describe("Held list request freezes the loading spinner")
        .route(RouteSpec::new(&p.api_pattern, RouteHandler::hold()).method(HttpMethod::Get))
        .step(p.held(HttpMethod::Get))
        .step(p.wait(WaitCondition::visible(spinner.clone())))
        .step(Step::capture("loading"))
        .step(Step::fulfill_held(
            RequestPredicate::Method(HttpMethod::Get),
            CaseFixtures::empty_list()?,
        ))
        .step(p.wait(WaitCondition::hidden(spinner)))
        .step(p.wait(WaitCondition::visible(Target::text(&p.empty_text)))))
}

fn list_state(p: &CasesProfile) -> FreezeResult<Scenario> {
    let codes: Vec<&str> = p.list_codes.iter().map(String::as_str).collect();
    let records: Vec<CaseRecord> = CaseFixtures::records(&codes);
    let mut scenario = Scenario::new("list-state", &p.cases_path)
        .describe("Populated list renders one entry per case")
        .route(p.list_route(CaseFixtures::list(&records)?));
    for code in &p.list_codes {
        scenario = scenario.step(p.wait(WaitCondition::visible(Target::text(code))));
    }
    Ok(scenario
        .step(p.check(Assertion::count(p.case_links(), p.list_codes.len())))
        .step(Step::capture("list")))
}

fn creating_state(p: &CasesProfile) -> FreezeResult<Scenario> {
    let button = p.create_button();
    let records = CaseFixtures::records(&[p.linked_case_code.as_str()]);
    let created = CaseRecord::draft("case-new", "AWM-2025-0002")
        .with_created_at("2024-05-23T10:05:00Z");
    Ok(Scenario::new("creating-state", &p.cases_path)
        .describe("Held create request freezes the button in its in-progress state")
        .route(p.list_route(CaseFixtures::list(&records)?))
        .route(RouteSpec::new(&p.api_pattern, RouteHandler::hold()).method(HttpMethod::Post))
        .step(p.check(Assertion::visible(button.clone())))
        .step(Step::Click(button.clone()))
        .step(p.held(HttpMethod::Post))
        .step(p.check(Assertion::text(button.clone(), &p.creating_label)))
        .step(p.check(Assertion::disabled(button.clone(), true)))
        .step(Step::capture("creating"))
        .step(Step::fulfill_held(
            RequestPredicate::Method(HttpMethod::Post),
            CaseFixtures::created(&created)?.with_delay(p.create_delay_ms),
        ))
        .step(p.wait(WaitCondition::text_equals(button.clone(), &p.idle_label)))
        .step(p.check(Assertion::disabled(button, false))))
}

fn open_case_link(p: &CasesProfile) -> FreezeResult<Scenario> {
    let records = CaseFixtures::records(&[p.linked_case_code.as_str()]);
    let by_name = Target::role("link", format!("{}{}", p.open_case_prefix, p.linked_case_code));
    Ok(Scenario::new("open-case-link", &p.cases_path)
        .describe("Case links are named by case code, not by their visible text")
        .route(p.list_route(CaseFixtures::list(&records)?))
        .step(p.wait(WaitCondition::visible(Target::role("heading", &p.page_heading))))
        .step(p.check(Assertion::visible(by_name)))
        .step(p.check(Assertion::count(Target::role("link", &p.open_case_text), 0)))
        .step(Step::capture("links")))
}

fn error_state(p: &CasesProfile) -> Scenario {
    Scenario::new("error-state", &p.cases_path)
        .describe("Server error payload renders the error panel")
        .route(p.list_route(FixtureResponse::error(500, &p.error_message)))
        .step(p.wait(WaitCondition::visible(Target::role("heading", &p.error_heading))))
        .step(Step::capture("error"))
}
