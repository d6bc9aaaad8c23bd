//! Freezeframe: deterministic verification of transient UI states
//!
//! Loading spinners and "Creating..." buttons normally live for a few
//! milliseconds. Freezeframe intercepts the page's API traffic, answers it
//! from fixtures, delays it, or holds it open until the test decides to
//! answer. That freezes the UI in the state under test long enough to assert
//! on its accessible markup and capture a screenshot.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  ScenarioRunner ──arm──► RouteTable ◄──dispatch── browser network    │
//! │        │                     │                                        │
//! │        │               Hold  │  Fulfill / Continue / Abort            │
//! │        │                     ▼                                        │
//! │        ├─fulfill──► HeldRequestRegistry ──release──► Fulfiller        │
//! │        │                                              (delayed task)  │
//! │        └─wait/assert──► Waiter / Assertion ──snapshot──► PageDriver   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use freezeframe::{CaseFixtures, Interceptor, RecordingTransport, RouteHandler, RouteSpec};
//! use std::sync::Arc;
//!
//! let interceptor = Interceptor::new(Arc::new(RecordingTransport::new()));
//! interceptor
//!     .arm(&[
//!         RouteSpec::new("**/api/cases", RouteHandler::respond(CaseFixtures::empty_list()?)),
//!     ])?;
//! # Ok::<(), freezeframe::FreezeError>(())
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod assertion;
mod browser;
mod catalog;
mod dom;
mod driver;
mod fixture;
mod fulfill;
mod interceptor;
mod locator;
mod network;
mod registry;
mod reporter;
mod result;
mod scenario;
mod wait;

pub use assertion::{
    assert_count, assert_disabled, assert_text, assert_visible, find_by_accessible_role,
    Assertion, AssertionRecord, RetryConfig,
};
pub use browser::{decode_post_data, ref_selector, snapshot_script, BrowserConfig, REF_ATTRIBUTE};
#[cfg(feature = "browser")]
pub use browser::{CdpTransport, ChromiumPage, ChromiumSession};
pub use catalog::{catalog, select, CasesProfile, SCENARIO_NAMES};
pub use dom::{describe_all, normalize_whitespace, ElementSnapshot};
pub use driver::{
    query_snapshots, ContextFactory, MockPage, PageDriver, ScenarioContext, BLANK_PNG,
};
pub use fixture::{CaseFixtures, CaseRecord, CaseStatus, FixtureResponse, JSON_CONTENT_TYPE};
pub use fulfill::{
    Delivery, FaultLog, Fulfiller, NetworkTransport, RecordingTransport, TransportAction,
    TransportEvent,
};
pub use interceptor::{DispatchOutcome, Interceptor, HELD_POLL_INTERVAL_MS};
pub use locator::{
    resolve, resolve_all, text_matches, DomQuery, ElementRef, MatchMode, NameMatch, Target,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS,
};
pub use network::{
    HttpMethod, InterceptedRequest, RequestId, RequestPredicate, Route, RouteDecision,
    RouteHandler, RouteId, RouteSpec, RouteTable, UrlGlob,
};
pub use registry::{HeldRequestRegistry, RequestHandle};
pub use reporter::{render_result, Report};
pub use result::{FreezeError, FreezeResult, Sighting};
pub use scenario::{
    sanitize, ArtifactStore, Scenario, ScenarioResult, ScenarioRunner, ScenarioSetup,
    ScenarioState, Step, StepFailure, FAILURE_CAPTURE, FINAL_CAPTURE, PARKING_URL,
};
pub use wait::{wait_for, MatchKind, ObservedElement, WaitCondition, Waiter};

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
