//! Assertion layer.
//!
//! Elements are resolved by computed role and accessible name, never by
//! visible text alone. Every failed check returns
//! [`FreezeError::AssertionFailed`] carrying expected and actual values.
//!
//! [`Assertion`] values are the step-level form: they re-resolve the element on
//! every attempt and retry until their [`RetryConfig`] timeout, reporting the
//! last failure. Ambiguous matches are reported at once.

use crate::dom::describe_all;
use crate::driver::PageDriver;
use crate::locator::{
    resolve, resolve_all, ElementRef, MatchMode, NameMatch, Target, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_TIMEOUT_MS,
};
use crate::result::{FreezeError, FreezeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Resolve an element by role and exact accessible name
pub async fn find_by_accessible_role(
    page: &dyn PageDriver,
    role: &str,
    name: &str,
    mode: MatchMode,
) -> FreezeResult<ElementRef> {
    let target = Target::role_matching(role, NameMatch::Exact(name.to_string()));
    resolve(page, &target, mode).await
}

/// The element is rendered
pub fn assert_visible(element: &ElementRef) -> FreezeResult<()> {
    if element.snapshot.visible {
        Ok(())
    } else {
        Err(FreezeError::assertion(element.to_string(), "visible", "hidden"))
    }
}

/// The element's whitespace-normalised text equals `expected`
pub fn assert_text(element: &ElementRef, expected: &str) -> FreezeResult<()> {
    let actual = element.text();
    let expected = crate::dom::normalize_whitespace(expected);
    if actual == expected {
        Ok(())
    } else {
        Err(FreezeError::assertion(
            element.to_string(),
            format!("text {expected:?}"),
            format!("text {actual:?}"),
        ))
    }
}

/// The element's disabled state equals `expected`
pub fn assert_disabled(element: &ElementRef, expected: bool) -> FreezeResult<()> {
    let label = |disabled: bool| if disabled { "disabled" } else { "enabled" };
    if element.snapshot.disabled == expected {
        Ok(())
    } else {
        Err(FreezeError::assertion(
            element.to_string(),
            label(expected),
            label(element.snapshot.disabled),
        ))
    }
}

/// Exactly `expected` elements match `target`
pub async fn assert_count(
    page: &dyn PageDriver,
    target: &Target,
    expected: usize,
) -> FreezeResult<usize> {
    let matches = resolve_all(page, target).await?;
    if matches.len() == expected {
        Ok(expected)
    } else {
        Err(FreezeError::assertion(
            target.to_string(),
            format!("{expected} element(s)"),
            describe_all(&matches),
        ))
    }
}

/// Retry budget for step-level assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total time to keep retrying
    pub timeout: Duration,
    /// Delay between attempts
    pub poll_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }
}

impl RetryConfig {
    /// Retry for `timeout` at the default interval
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Set the poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Single attempt, no retry
    #[must_use]
    pub const fn once() -> Self {
        Self {
            timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
        }
    }
}

/// A check a scenario step can make
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assertion {
    /// Exactly one match, rendered
    Visible(Target),
    /// Exactly one match whose text equals
    Text {
        /// Element
        target: Target,
        /// Expected text
        expected: String,
    },
    /// Exactly one match with this disabled state
    Disabled {
        /// Element
        target: Target,
        /// Expected state
        expected: bool,
    },
    /// Number of matches
    Count {
        /// Elements
        target: Target,
        /// Expected number
        expected: usize,
    },
}

impl Assertion {
    /// Element is visible
    #[must_use]
    pub const fn visible(target: Target) -> Self {
        Self::Visible(target)
    }

    /// Element text equals
    #[must_use]
    pub fn text(target: Target, expected: impl Into<String>) -> Self {
        Self::Text {
            target,
            expected: expected.into(),
        }
    }

    /// Element disabled state equals
    #[must_use]
    pub const fn disabled(target: Target, expected: bool) -> Self {
        Self::Disabled { target, expected }
    }

    /// Number of matching elements
    #[must_use]
    pub const fn count(target: Target, expected: usize) -> Self {
        Self::Count { target, expected }
    }

    /// Element the assertion is about
    #[must_use]
    pub fn target(&self) -> &Target {
        match self {
            Self::Visible(target)
            | Self::Text { target, .. }
            | Self::Disabled { target, .. }
            | Self::Count { target, .. } => target,
        }
    }

    /// Run once
    pub async fn check(&self, page: &dyn PageDriver) -> FreezeResult<()> {
        match self {
            Self::Visible(target) => {
                assert_visible(&resolve(page, target, MatchMode::Strict).await?)
            }
            Self::Text { target, expected } => {
                assert_text(&resolve(page, target, MatchMode::Strict).await?, expected)
            }
            Self::Disabled { target, expected } => {
                assert_disabled(&resolve(page, target, MatchMode::Strict).await?, *expected)
            }
            Self::Count { target, expected } => assert_count(page, target, *expected).await.map(|_| ()),
        }
    }

    /// Run until it passes or `retry.timeout` elapses.
    ///
    /// Returns the number of attempts. Ambiguous matches and page errors end
    /// the retry loop at once.
    pub async fn verify(&self, page: &dyn PageDriver, retry: RetryConfig) -> FreezeResult<u32> {
        let start = Instant::now();
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            match self.check(page).await {
                Ok(()) => {
                    debug!(assertion = %self, attempts, "assertion passed");
                    return Ok(attempts);
                }
                Err(e @ FreezeError::AssertionFailed { .. }) => {
                    trace!(assertion = %self, attempts, "{e}");
                    let elapsed = start.elapsed();
                    if elapsed >= retry.timeout {
                        return Err(e);
                    }
                    tokio::time::sleep(retry.poll_interval.min(retry.timeout - elapsed)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Visible(target) => write!(f, "{target} is visible"),
            Self::Text { target, expected } => write!(f, "{target} has text {expected:?}"),
            Self::Disabled { target, expected: true } => write!(f, "{target} is disabled"),
            Self::Disabled { target, expected: false } => write!(f, "{target} is enabled"),
            Self::Count { target, expected } => write!(f, "{target} matches {expected} element(s)"),
        }
    }
}

/// One executed assertion, as reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionRecord {
    /// What was asserted
    pub description: String,
    /// Outcome
    pub passed: bool,
    /// Attempts made
    pub attempts: u32,
    /// Failure detail
    pub detail: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::dom::ElementSnapshot;
    use crate::driver::MockPage;
    use std::sync::Arc;

    fn create_button(text: &str, disabled: bool) -> ElementSnapshot {
        ElementSnapshot::new(10, "button")
            .with_attr("aria-label", "Create new patient case")
            .with_text(text)
            .with_disabled(disabled)
    }

    fn create_target() -> Target {
        Target::role("button", "Create new patient case")
    }

    mod find_tests {
        use super::*;

        #[tokio::test]
        async fn test_accessible_name_versus_visible_text() {
            let page = MockPage::with_elements(vec![ElementSnapshot::new(1, "a")
                .with_attr("href", "/cases/case-123")
                .with_attr("aria-label", "Open case AWM-2025-0001")
                .with_text("Open Case")]);

            let link = find_by_accessible_role(&page, "link", "Open case AWM-2025-0001", MatchMode::Strict)
                .await
                .unwrap();
            assert_eq!(link.snapshot.ref_id, 1);

            let miss = find_by_accessible_role(&page, "link", "Open Case", MatchMode::Strict).await;
            assert_eq!(miss.unwrap_err().kind(), "AssertionFailed");
            assert_eq!(
                assert_count(&page, &Target::role("link", "Open Case"), 0).await.unwrap(),
                0
            );
        }

        #[tokio::test]
        async fn test_ambiguous_unless_first() {
            let page = MockPage::with_elements(vec![
                ElementSnapshot::new(1, "button").with_text("Save"),
                ElementSnapshot::new(2, "button").with_text("Save"),
            ]);
            let err = find_by_accessible_role(&page, "button", "Save", MatchMode::Strict)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "AmbiguousMatch");
            let first = find_by_accessible_role(&page, "button", "Save", MatchMode::First)
                .await
                .unwrap();
            assert_eq!(first.snapshot.ref_id, 1);
        }
    }

    mod pure_assertion_tests {
        use super::*;

        fn element(snapshot: ElementSnapshot) -> ElementRef {
            ElementRef {
                target: create_target(),
                snapshot,
            }
        }

        #[test]
        fn test_assert_text_reports_both_values() {
            let err = assert_text(&element(create_button("New Case", false)), "Creating...").unwrap_err();
            let FreezeError::AssertionFailed { expected, actual, .. } = err else {
                panic!("wrong error kind");
            };
            assert_eq!(expected, "text \"Creating...\"");
            assert_eq!(actual, "text \"New Case\"");
        }

        #[test]
        fn test_assert_disabled() {
            assert!(assert_disabled(&element(create_button("Creating...", true)), true).is_ok());
            let err = assert_disabled(&element(create_button("New Case", false)), true).unwrap_err();
            assert!(err.to_string().contains("expected disabled, actual enabled"));
        }

        #[test]
        fn test_assert_visible() {
            assert!(assert_visible(&element(create_button("x", false))).is_ok());
            assert!(assert_visible(&element(create_button("x", false).hidden())).is_err());
        }
    }

    mod retry_tests {
        use super::*;

        #[tokio::test]
        async fn test_retries_until_state_reached() {
            let page = Arc::new(MockPage::with_elements(vec![create_button("New Case", false)]));
            let background = Arc::clone(&page);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                background.set_elements(vec![create_button("Creating...", true)]);
            });

            let retry = RetryConfig::new(Duration::from_secs(2)).with_poll_interval(Duration::from_millis(10));
            let attempts = Assertion::text(create_target(), "Creating...")
                .verify(&*page, retry)
                .await
                .unwrap();
            assert!(attempts > 1);
            Assertion::disabled(create_target(), true)
                .verify(&*page, RetryConfig::once())
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_reports_last_assertion_failure() {
            let page = MockPage::with_elements(vec![create_button("New Case", false)]);
            let retry = RetryConfig::new(Duration::from_millis(60)).with_poll_interval(Duration::from_millis(10));
            let err = Assertion::text(create_target(), "Creating...")
                .verify(&page, retry)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "AssertionFailed");
            assert!(err.to_string().contains("New Case"));
        }

        #[tokio::test]
        async fn test_ambiguity_not_retried() {
            let page = MockPage::with_elements(vec![
                create_button("a", false),
                create_button("b", false),
            ]);
            let start = Instant::now();
            let err = Assertion::visible(create_target())
                .verify(&page, RetryConfig::new(Duration::from_secs(5)))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "AmbiguousMatch");
            assert!(start.elapsed() < Duration::from_secs(1));
        }

        #[test]
        fn test_display() {
            assert_eq!(
                Assertion::disabled(create_target(), false).to_string(),
                "role button with name \"Create new patient case\" is enabled"
            );
            assert_eq!(Assertion::count(Target::css("li"), 2).target(), &Target::css("li"));
        }
    }
}
