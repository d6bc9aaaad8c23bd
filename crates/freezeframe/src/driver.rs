//! Page driver abstraction.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ScenarioRunner                                               │
//! │        │ open_context()                                       │
//! │        ▼                                                      │
//! │  ContextFactory ──► ScenarioContext { page, interceptor }     │
//! │                        │               │                      │
//! │             PageDriver ┘               └ NetworkTransport      │
//! │  (ChromiumPage / MockPage / test pages)                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything the runner needs from a browser goes through [`PageDriver`], so
//! scenarios can be exercised without launching Chromium.

use crate::dom::ElementSnapshot;
use crate::interceptor::Interceptor;
use crate::locator::{text_matches, DomQuery, ElementRef};
use crate::lock;
use crate::result::{FreezeError, FreezeResult};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One page of an isolated browsing context
#[async_trait]
pub trait PageDriver: Send + Sync + fmt::Debug {
    /// Navigate and wait for the load to finish
    async fn goto(&self, url: &str, timeout: Duration) -> FreezeResult<()>;

    /// Reload the current document
    async fn reload(&self, timeout: Duration) -> FreezeResult<()>;

    /// Candidate elements for a query, in document order
    async fn snapshot(&self, query: &DomQuery) -> FreezeResult<Vec<ElementSnapshot>>;

    /// Click a resolved element
    async fn click(&self, element: &ElementRef) -> FreezeResult<()>;

    /// PNG screenshot of the viewport
    async fn screenshot(&self) -> FreezeResult<Vec<u8>>;

    /// Current document URL
    async fn current_url(&self) -> FreezeResult<String>;

    /// Close the page and its context
    async fn close(&self) -> FreezeResult<()>;
}

/// A page together with the interception state of its context
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    /// The page
    pub page: Arc<dyn PageDriver>,
    /// Routes and held requests of this context only
    pub interceptor: Interceptor,
}

/// Opens isolated browsing contexts
#[async_trait]
pub trait ContextFactory: Send + Sync + fmt::Debug {
    /// Open a fresh context with one blank page
    async fn open_context(&self) -> FreezeResult<ScenarioContext>;
}

// ============================================================================
// Mock page
// ============================================================================

/// 1x1 placeholder PNG returned by mock pages
pub const BLANK_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// Static in-memory page for unit tests
#[derive(Debug, Default)]
pub struct MockPage {
    elements: Mutex<Vec<ElementSnapshot>>,
    url: Mutex<String>,
    history: Mutex<Vec<String>>,
    fail_screenshots: Mutex<bool>,
}

impl MockPage {
    /// Create an empty page
    #[must_use]
    pub fn new() -> Self {
        Self {
            url: Mutex::new("about:blank".to_string()),
            ..Self::default()
        }
    }

    /// Create a page showing `elements`
    #[must_use]
    pub fn with_elements(elements: Vec<ElementSnapshot>) -> Self {
        let page = Self::new();
        page.set_elements(elements);
        page
    }

    /// Replace the rendered elements
    pub fn set_elements(&self, elements: Vec<ElementSnapshot>) {
        *lock(&self.elements) = elements;
    }

    /// Make screenshots fail
    pub fn fail_screenshots(&self) {
        *lock(&self.fail_screenshots) = true;
    }

    /// Call history for verification
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        lock(&self.history).clone()
    }

    /// Check if a call was made
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        lock(&self.history).iter().any(|c| c.starts_with(method))
    }

    fn record(&self, call: String) {
        lock(&self.history).push(call);
    }
}

/// Answer a [`DomQuery`] over in-memory snapshots.
///
/// CSS support covers comma-separated compound selectors made of a tag,
/// `#id`, `.class` and `[attr]` / `[attr="value"]` parts. Combinators never
/// match.
#[must_use]
pub fn query_snapshots(elements: &[ElementSnapshot], query: &DomQuery) -> Vec<ElementSnapshot> {
    elements
        .iter()
        .filter(|el| match query {
            DomQuery::Css(selector) => css_matches(el, selector),
            DomQuery::Role(role) => el.role().is_some_and(|r| r.eq_ignore_ascii_case(role)),
            DomQuery::Text(text) => text_matches(&el.own_text, text),
        })
        .cloned()
        .collect()
}

fn css_matches(element: &ElementSnapshot, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .any(|compound| compound_matches(element, compound))
}

fn compound_matches(element: &ElementSnapshot, compound: &str) -> bool {
    if compound.contains(|c: char| c.is_whitespace() || matches!(c, '>' | '+' | '~')) {
        return false;
    }

    let classes: Vec<&str> = element
        .attribute("class")
        .map(|c| c.split_whitespace().collect())
        .unwrap_or_default();

    let mut rest = compound;
    let tag_end = rest.find(['.', '#', '[']).unwrap_or(rest.len());
    let tag = &rest[..tag_end];
    if !tag.is_empty() && tag != "*" && !tag.eq_ignore_ascii_case(&element.tag) {
        return false;
    }
    rest = &rest[tag_end..];

    while let Some(first) = rest.chars().next() {
        match first {
            '.' | '#' => {
                let body = &rest[1..];
                let end = body.find(['.', '#', '[']).unwrap_or(body.len());
                let name = &body[..end];
                let ok = if first == '.' {
                    classes.contains(&name)
                } else {
                    element.attribute("id") == Some(name)
                };
                if !ok {
                    return false;
                }
                rest = &body[end..];
            }
            '[' => {
                let Some(close) = rest.find(']') else {
                    return false;
                };
                let inner = &rest[1..close];
                let ok = match inner.split_once('=') {
                    Some((name, value)) => {
                        let value = value.trim_matches(|c| c == '"' || c == '\'');
                        element.attribute(name.trim()) == Some(value)
                    }
                    None => match inner.trim() {
                        "href" => element.has_href,
                        "disabled" => element.disabled,
                        name => element.attribute(name).is_some(),
                    },
                };
                if !ok {
                    return false;
                }
                rest = &rest[close + 1..];
            }
            _ => return false,
        }
    }
    true
}

#[async_trait]
impl PageDriver for MockPage {
    async fn goto(&self, url: &str, _timeout: Duration) -> FreezeResult<()> {
        self.record(format!("goto:{url}"));
        *lock(&self.url) = url.to_string();
        Ok(())
    }

    async fn reload(&self, _timeout: Duration) -> FreezeResult<()> {
        self.record("reload".to_string());
        Ok(())
    }

    async fn snapshot(&self, query: &DomQuery) -> FreezeResult<Vec<ElementSnapshot>> {
        Ok(query_snapshots(&lock(&self.elements), query))
    }

    async fn click(&self, element: &ElementRef) -> FreezeResult<()> {
        self.record(format!("click:{}", element.snapshot.ref_id));
        Ok(())
    }

    async fn screenshot(&self) -> FreezeResult<Vec<u8>> {
        self.record("screenshot".to_string());
        if *lock(&self.fail_screenshots) {
            return Err(FreezeError::Screenshot {
                message: "mock screenshot failure".to_string(),
            });
        }
        Ok(BLANK_PNG.to_vec())
    }

    async fn current_url(&self) -> FreezeResult<String> {
        Ok(lock(&self.url).clone())
    }

    async fn close(&self) -> FreezeResult<()> {
        self.record("close".to_string());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::locator::Target;

    fn spinner() -> ElementSnapshot {
        ElementSnapshot::new(1, "div").with_attr("class", "h-8 w-8 animate-spin rounded-full")
    }

    mod css_tests {
        use super::*;

        #[test]
        fn test_class_selector() {
            assert!(css_matches(&spinner(), ".animate-spin"));
            assert!(css_matches(&spinner(), "div.animate-spin.rounded-full"));
            assert!(!css_matches(&spinner(), "span.animate-spin"));
            assert!(!css_matches(&spinner(), ".animate"));
        }

        #[test]
        fn test_attribute_and_id_selectors() {
            let input = ElementSnapshot::new(2, "input")
                .with_attr("id", "code")
                .with_attr("type", "text");
            assert!(css_matches(&input, "#code"));
            assert!(css_matches(&input, "input[type=\"text\"]"));
            assert!(css_matches(&input, "[type]"));
            assert!(!css_matches(&input, "[type='checkbox']"));
        }

        #[test]
        fn test_selector_lists_and_combinators() {
            assert!(css_matches(&spinner(), "p, .animate-spin"));
            assert!(!css_matches(&spinner(), "main .animate-spin"));
        }
    }

    mod mock_page_tests {
        use super::*;

        #[tokio::test]
        async fn test_snapshot_by_role_and_text() {
            let page = MockPage::with_elements(vec![
                spinner(),
                ElementSnapshot::new(2, "h1").with_text("Patient Cases"),
                ElementSnapshot::new(3, "p").with_text("No cases yet."),
            ]);
            let headings = page.snapshot(&DomQuery::Role("heading".to_string())).await.unwrap();
            assert_eq!(headings.len(), 1);
            let text = page.snapshot(&DomQuery::Text("no cases".to_string())).await.unwrap();
            assert_eq!(text[0].ref_id, 3);
        }

        #[tokio::test]
        async fn test_history_records_calls() {
            let page = MockPage::with_elements(vec![ElementSnapshot::new(5, "button").with_text("Go")]);
            page.goto("http://localhost:3000/cases", Duration::from_secs(1))
                .await
                .unwrap();
            let element = crate::locator::resolve(&page, &Target::role("button", "Go"), Default::default())
                .await
                .unwrap();
            page.click(&element).await.unwrap();
            assert_eq!(page.current_url().await.unwrap(), "http://localhost:3000/cases");
            assert!(page.was_called("click:5"));
            assert_eq!(page.screenshot().await.unwrap(), BLANK_PNG);
        }

        #[tokio::test]
        async fn test_screenshot_failure() {
            let page = MockPage::new();
            page.fail_screenshots();
            let err = page.screenshot().await.unwrap_err();
            assert_eq!(err.kind(), "ScreenshotError");
        }
    }
}
