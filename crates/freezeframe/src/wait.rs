//! State-reached waiter.
//!
//! Re-evaluates a [`WaitCondition`] against fresh DOM snapshots at a bounded
//! poll interval until it holds or its timeout elapses. A timeout cancels only
//! the wait; the page and its context stay usable.

use crate::dom::{describe_all, normalize_whitespace, ElementSnapshot};
use crate::driver::PageDriver;
use crate::locator::{resolve_all, ElementRef, Target, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS};
use crate::result::{FreezeError, FreezeResult, Sighting};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// What must hold for the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    /// At least one element matches
    Presence,
    /// At least one match is rendered
    Visible,
    /// No match is rendered (absent counts as hidden)
    Hidden,
    /// A match has exactly this text (whitespace-normalised)
    TextEquals(String),
    /// A match has this attribute value
    AttributeEquals {
        /// Attribute name
        name: String,
        /// Expected value
        value: String,
    },
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presence => f.write_str("present"),
            Self::Visible => f.write_str("visible"),
            Self::Hidden => f.write_str("hidden"),
            Self::TextEquals(text) => write!(f, "with text {text:?}"),
            Self::AttributeEquals { name, value } => write!(f, "with {name}={value:?}"),
        }
    }
}

/// A condition to wait for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitCondition {
    /// Element to observe
    pub target: Target,
    /// What must hold
    pub kind: MatchKind,
    /// Budget in milliseconds
    pub timeout_ms: u64,
    /// Delay between polls in milliseconds
    pub poll_interval_ms: u64,
}

impl WaitCondition {
    /// Condition with default timeout and poll interval
    #[must_use]
    pub fn new(target: Target, kind: MatchKind) -> Self {
        Self {
            target,
            kind,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    /// Target exists
    #[must_use]
    pub fn presence(target: Target) -> Self {
        Self::new(target, MatchKind::Presence)
    }

    /// Target is rendered
    #[must_use]
    pub fn visible(target: Target) -> Self {
        Self::new(target, MatchKind::Visible)
    }

    /// Target is gone or not rendered
    #[must_use]
    pub fn hidden(target: Target) -> Self {
        Self::new(target, MatchKind::Hidden)
    }

    /// Target text equals `text`
    #[must_use]
    pub fn text_equals(target: Target, text: impl Into<String>) -> Self {
        Self::new(target, MatchKind::TextEquals(text.into()))
    }

    /// Target attribute equals `value`
    #[must_use]
    pub fn attribute_equals(
        target: Target,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::new(
            target,
            MatchKind::AttributeEquals {
                name: name.into(),
                value: value.into(),
            },
        )
    }

    /// Set timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set poll interval (clamped to at least 1ms)
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms.max(1);
        self
    }

    /// Timeout as duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Poll interval as duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Check the condition against resolved matches.
    ///
    /// `Some(element)` when satisfied; the element is `None` for `Hidden`.
    fn evaluate(&self, matches: &[ElementSnapshot]) -> Option<Option<ElementSnapshot>> {
        let found = match &self.kind {
            MatchKind::Hidden => {
                return matches.iter().all(|m| !m.visible).then_some(None);
            }
            MatchKind::Presence => matches.first(),
            MatchKind::Visible => matches.iter().find(|m| m.visible),
            MatchKind::TextEquals(text) => {
                let expected = normalize_whitespace(text);
                matches.iter().find(|m| m.normalized_text() == expected)
            }
            MatchKind::AttributeEquals { name, value } => matches
                .iter()
                .find(|m| m.attribute(name) == Some(value.as_str())),
        };
        found.map(|el| Some(el.clone()))
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.target, self.kind)
    }
}

/// Result of a satisfied wait
#[derive(Debug, Clone)]
pub struct ObservedElement {
    /// Element that satisfied the condition (`None` for hidden conditions)
    pub element: Option<ElementRef>,
    /// Number of polls made
    pub attempts: u32,
    /// Time spent waiting
    pub elapsed: Duration,
}

/// Polls a page until conditions hold
#[derive(Debug, Clone, Copy)]
pub struct Waiter<'a> {
    page: &'a dyn PageDriver,
}

impl<'a> Waiter<'a> {
    /// Create a waiter over a page
    #[must_use]
    pub fn new(page: &'a dyn PageDriver) -> Self {
        Self { page }
    }

    /// Wait until `condition` holds.
    ///
    /// Query errors (e.g. the page is mid-navigation) count as "nothing
    /// matched" and are kept in the last-observed description.
    pub async fn wait_for(&self, condition: &WaitCondition) -> FreezeResult<ObservedElement> {
        let start = Instant::now();
        let timeout = condition.timeout();
        let mut attempts = 0_u32;
        let mut ever_seen = false;
        let mut seen_last = false;
        let mut last_observed = String::from("nothing observed");

        loop {
            attempts += 1;
            match resolve_all(self.page, &condition.target).await {
                Ok(matches) => {
                    seen_last = !matches.is_empty();
                    ever_seen |= seen_last;
                    if let Some(element) = condition.evaluate(&matches) {
                        let elapsed = start.elapsed();
                        debug!(condition = %condition, attempts, ?elapsed, "wait satisfied");
                        return Ok(ObservedElement {
                            element: element.map(|snapshot| ElementRef {
                                target: condition.target.clone(),
                                snapshot,
                            }),
                            attempts,
                            elapsed,
                        });
                    }
                    last_observed = describe_all(&matches);
                }
                Err(e) => {
                    seen_last = false;
                    last_observed = format!("query failed: {e}");
                }
            }
            trace!(condition = %condition, attempts, observed = %last_observed, "poll");

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(FreezeError::Timeout {
                    condition: condition.to_string(),
                    attempts,
                    elapsed_ms: elapsed.as_millis() as u64,
                    sighting: Sighting::from_polls(ever_seen, seen_last),
                    last_observed,
                });
            }
            tokio::time::sleep(condition.poll_interval().min(timeout - elapsed)).await;
        }
    }
}

/// Wait for `condition` on `page`
pub async fn wait_for(page: &dyn PageDriver, condition: &WaitCondition) -> FreezeResult<ObservedElement> {
    Waiter::new(page).wait_for(condition).await
}
