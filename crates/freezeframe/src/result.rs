//! Result and error types for Freezeframe.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for Freezeframe operations
pub type FreezeResult<T> = Result<T, FreezeError>;

/// Errors that can occur while driving a scenario
#[derive(Debug, Error)]
pub enum FreezeError {
    /// A route was misconfigured or did not match as often as required
    #[error("Route configuration error for {pattern:?}: {message}")]
    RouteConfig {
        /// URL glob the route was registered with
        pattern: String,
        /// What went wrong
        message: String,
    },

    /// A request handle was fulfilled after it was released, or never existed
    #[error("Stale request handle #{handle}: {message}")]
    StaleHandle {
        /// Raw handle value
        handle: u64,
        /// Why the handle is no longer usable
        message: String,
    },

    /// A wait condition was not satisfied within its budget
    #[error(
        "Timed out after {elapsed_ms}ms ({attempts} polls) waiting for {condition}; \
         target {sighting}; last observed: {last_observed}"
    )]
    Timeout {
        /// Human-readable description of the condition
        condition: String,
        /// Number of poll attempts made
        attempts: u32,
        /// Wall-clock time spent waiting
        elapsed_ms: u64,
        /// What polling saw of the target
        sighting: Sighting,
        /// Description of the last DOM observation
        last_observed: String,
    },

    /// An accessible-role (or other strict) query matched more than one element
    #[error("Ambiguous match for {target}: {count} elements matched ({candidates})")]
    AmbiguousMatch {
        /// Target that was queried
        target: String,
        /// Number of matches
        count: usize,
        /// Summary of the matched elements
        candidates: String,
    },

    /// An observed value differed from the expected one
    #[error("Assertion failed on {subject}: expected {expected}, actual {actual}")]
    AssertionFailed {
        /// Element or query the assertion was about
        subject: String,
        /// Expected value
        expected: String,
        /// Observed value
        actual: String,
    },

    /// A fixture body is not well-formed for its declared content type
    #[error("Malformed fixture body for content type {content_type}: {message}")]
    MalformedFixture {
        /// Declared content type
        content_type: String,
        /// Parser message
        message: String,
    },

    /// Held requests were still pending when the scenario finished
    #[error("{count} held request(s) were never fulfilled: {urls}")]
    UnfulfilledRequests {
        /// Number of pending requests
        count: usize,
        /// URLs of the pending requests
        urls: String,
    },

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Page error
    #[error("Page error: {message}")]
    Page {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Screenshot error
    #[error("Screenshot failed: {message}")]
    Screenshot {
        /// Error message
        message: String,
    },

    /// The browser's network layer rejected a fulfil/continue/abort
    #[error("Network transport error: {message}")]
    Transport {
        /// Error message
        message: String,
    },

    /// Invalid state error (operation called in wrong state)
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

/// What a timed-out wait saw of its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sighting {
    /// No poll ever resolved the target
    Never,
    /// The target resolved at some point but was gone on the last poll
    Vanished,
    /// The target was there on the last poll, in the wrong state
    Present,
}

impl Sighting {
    /// Classify from whether the target was ever seen and whether the last
    /// poll found it
    #[must_use]
    pub const fn from_polls(ever_seen: bool, seen_last: bool) -> Self {
        match (ever_seen, seen_last) {
            (false, _) => Self::Never,
            (true, false) => Self::Vanished,
            (true, true) => Self::Present,
        }
    }
}

impl fmt::Display for Sighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "never appeared"),
            Self::Vanished => write!(f, "appeared then disappeared"),
            Self::Present => write!(f, "present but never satisfied the condition"),
        }
    }
}

impl FreezeError {
    /// Stable label for reports
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RouteConfig { .. } => "RouteConfigError",
            Self::StaleHandle { .. } => "StaleHandle",
            Self::Timeout { .. } => "TimeoutError",
            Self::AmbiguousMatch { .. } => "AmbiguousMatch",
            Self::AssertionFailed { .. } => "AssertionFailed",
            Self::MalformedFixture { .. } => "MalformedFixture",
            Self::UnfulfilledRequests { .. } => "UnfulfilledRequests",
            Self::BrowserLaunch { .. } => "BrowserLaunchError",
            Self::Page { .. } => "PageError",
            Self::Navigation { .. } => "NavigationError",
            Self::Screenshot { .. } => "ScreenshotError",
            Self::Transport { .. } => "TransportError",
            Self::InvalidState { .. } => "InvalidState",
            Self::Config { .. } => "ConfigError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
            Self::Yaml(_) => "YamlError",
        }
    }

    /// Create an assertion failure
    #[must_use]
    pub fn assertion(
        subject: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::AssertionFailed {
            subject: subject.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a page error
    #[must_use]
    pub fn page(message: impl Into<String>) -> Self {
        Self::Page {
            message: message.into(),
        }
    }

    /// Create a transport error
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_distinguishes_never_appeared() {
        let err = FreezeError::Timeout {
            condition: "text \"No cases yet\" visible".to_string(),
            attempts: 12,
            elapsed_ms: 600,
            sighting: Sighting::Never,
            last_observed: "0 elements".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("never appeared"));
        assert!(msg.contains("12 polls"));
        assert!(msg.contains("No cases yet"));
    }

    #[test]
    fn test_timeout_names_each_sighting() {
        let timeout = |sighting| FreezeError::Timeout {
            condition: "spinner visible".to_string(),
            attempts: 3,
            elapsed_ms: 150,
            sighting,
            last_observed: "0 elements".to_string(),
        };
        let vanished = timeout(Sighting::Vanished).to_string();
        assert!(vanished.contains("appeared then disappeared"));
        assert!(!vanished.contains("never satisfied"));
        let present = timeout(Sighting::Present).to_string();
        assert!(present.contains("present but never satisfied"));
        assert!(!present.contains("disappeared"));
    }

    #[test]
    fn test_sighting_from_polls() {
        assert_eq!(Sighting::from_polls(false, false), Sighting::Never);
        assert_eq!(Sighting::from_polls(true, false), Sighting::Vanished);
        assert_eq!(Sighting::from_polls(true, true), Sighting::Present);
    }

    #[test]
    fn test_assertion_carries_expected_and_actual() {
        let err = FreezeError::assertion("button \"Create new patient case\"", "\"Creating...\"", "\"New Case\"");
        let msg = err.to_string();
        assert!(msg.contains("expected \"Creating...\""));
        assert!(msg.contains("actual \"New Case\""));
        assert_eq!(err.kind(), "AssertionFailed");
    }

    #[test]
    fn test_kinds_are_stable() {
        let stale = FreezeError::StaleHandle {
            handle: 3,
            message: "already fulfilled".to_string(),
        };
        assert_eq!(stale.kind(), "StaleHandle");
        assert_eq!(FreezeError::config("x").kind(), "ConfigError");
        assert_eq!(FreezeError::transport("x").kind(), "TransportError");
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FreezeError = io_err.into();
        assert!(err.to_string().contains("I/O"));
    }
}
