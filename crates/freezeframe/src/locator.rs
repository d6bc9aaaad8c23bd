//! Element targets and their resolution against a page.
//!
//! A [`Target`] is turned into a [`DomQuery`] for the page driver, which returns
//! candidate snapshots. Candidates are then filtered here by computed role and
//! accessible name, so name matching never depends on visible text alone.
//!
//! Resolution is strict by default: more than one match is an
//! [`FreezeError::AmbiguousMatch`] unless [`MatchMode::First`] is requested.

use crate::dom::{describe_all, normalize_whitespace, ElementSnapshot};
use crate::driver::PageDriver;
use crate::result::{FreezeError, FreezeResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default timeout for waits and retried assertions (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default polling interval (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// How an accessible name is compared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameMatch {
    /// Any name, including none
    Any,
    /// Equal after whitespace normalisation (case-sensitive)
    Exact(String),
    /// Starts with these whole words
    Prefix(String),
    /// Contains
    Contains(String),
}

impl NameMatch {
    /// Compare against a computed accessible name
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let name = normalize_whitespace(name);
        match self {
            Self::Any => true,
            Self::Exact(expected) => name == normalize_whitespace(expected),
            Self::Prefix(prefix) => {
                let prefix = normalize_whitespace(prefix);
                name.strip_prefix(prefix.as_str()).is_some_and(|rest| {
                    rest.is_empty()
                        || rest.starts_with(' ')
                        || !prefix.ends_with(char::is_alphanumeric)
                })
            }
            Self::Contains(part) => name.contains(&normalize_whitespace(part)),
        }
    }
}

impl fmt::Display for NameMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any name"),
            Self::Exact(n) => write!(f, "name {n:?}"),
            Self::Prefix(n) => write!(f, "name starting with {n:?}"),
            Self::Contains(n) => write!(f, "name containing {n:?}"),
        }
    }
}

/// What to locate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// CSS selector, e.g. `.animate-spin`
    Css(String),
    /// ARIA role plus accessible name
    Role {
        /// Role, e.g. `link`
        role: String,
        /// Name comparison
        name: NameMatch,
    },
    /// Elements whose own text contains the substring (case-insensitive)
    Text(String),
}

impl Target {
    /// CSS target
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Role target with an exact accessible name
    #[must_use]
    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: NameMatch::Exact(name.into()),
        }
    }

    /// Role target with a custom name comparison
    #[must_use]
    pub fn role_matching(role: impl Into<String>, name: NameMatch) -> Self {
        Self::Role {
            role: role.into(),
            name,
        }
    }

    /// Text target
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Query handed to the page driver
    #[must_use]
    pub fn query(&self) -> DomQuery {
        match self {
            Self::Css(selector) => DomQuery::Css(selector.clone()),
            Self::Role { role, .. } => DomQuery::Role(role.to_ascii_lowercase()),
            Self::Text(text) => DomQuery::Text(text.clone()),
        }
    }

    /// Whether a candidate returned for [`Self::query`] is a real match
    #[must_use]
    pub fn matches(&self, element: &ElementSnapshot) -> bool {
        match self {
            Self::Css(_) => true,
            Self::Role { role, name } => {
                element
                    .role()
                    .is_some_and(|r| r.eq_ignore_ascii_case(role))
                    && name.matches(&element.accessible_name())
            }
            Self::Text(text) => text_matches(&element.own_text, text),
        }
    }

    /// Candidates worth listing when nothing matched
    fn near_misses(&self, candidates: &[ElementSnapshot]) -> Vec<ElementSnapshot> {
        match self {
            Self::Role { role, .. } => candidates
                .iter()
                .filter(|c| c.role().is_some_and(|r| r.eq_ignore_ascii_case(role)))
                .cloned()
                .collect(),
            _ => candidates.to_vec(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(selector) => write!(f, "css {selector:?}"),
            Self::Role { role, name } => write!(f, "role {role} with {name}"),
            Self::Text(text) => write!(f, "text {text:?}"),
        }
    }
}

/// Case-insensitive, whitespace-normalised substring test
#[must_use]
pub fn text_matches(haystack: &str, needle: &str) -> bool {
    let needle = normalize_whitespace(needle).to_lowercase();
    !needle.is_empty() && normalize_whitespace(haystack).to_lowercase().contains(&needle)
}

/// Candidate query understood by every [`PageDriver`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomQuery {
    /// Elements matching a CSS selector
    Css(String),
    /// Elements that may carry the role (explicitly or implicitly)
    Role(String),
    /// Elements whose own text contains the substring
    Text(String),
}

/// Strict or first-match resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchMode {
    /// Exactly one element must match
    #[default]
    Strict,
    /// Take the first match in document order
    First,
}

/// A resolved element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    /// How it was found
    pub target: Target,
    /// What it looked like when resolved
    pub snapshot: ElementSnapshot,
}

impl ElementRef {
    /// Computed accessible name
    #[must_use]
    pub fn accessible_name(&self) -> String {
        self.snapshot.accessible_name()
    }

    /// Whitespace-normalised text
    #[must_use]
    pub fn text(&self) -> String {
        self.snapshot.normalized_text()
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.target, self.snapshot.describe())
    }
}

/// All elements matching `target`, in document order
pub async fn resolve_all(
    page: &dyn PageDriver,
    target: &Target,
) -> FreezeResult<Vec<ElementSnapshot>> {
    let candidates = page.snapshot(&target.query()).await?;
    Ok(candidates.into_iter().filter(|c| target.matches(c)).collect())
}

/// Resolve `target` to one element
pub async fn resolve(
    page: &dyn PageDriver,
    target: &Target,
    mode: MatchMode,
) -> FreezeResult<ElementRef> {
    let candidates = page.snapshot(&target.query()).await?;
    select(target, candidates, mode)
}

/// Pick one element out of driver candidates
pub fn select(
    target: &Target,
    candidates: Vec<ElementSnapshot>,
    mode: MatchMode,
) -> FreezeResult<ElementRef> {
    let (matched, rest): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|c| target.matches(c));

    match (matched.len(), mode) {
        (0, _) => Err(FreezeError::assertion(
            target.to_string(),
            "a matching element",
            format!("none; nearby: {}", describe_all(&target.near_misses(&rest))),
        )),
        (1, _) | (_, MatchMode::First) => {
            let snapshot = matched.into_iter().next().ok_or_else(|| FreezeError::InvalidState {
                message: "matched element vanished during selection".to_string(),
            })?;
            Ok(ElementRef {
                target: target.clone(),
                snapshot,
            })
        }
        (count, MatchMode::Strict) => Err(FreezeError::AmbiguousMatch {
            target: target.to_string(),
            count,
            candidates: describe_all(&matched),
        }),
    }
}
