//! Canned responses substituted for backend calls.
//!
//! [`FixtureResponse`] is what a route handler or the driver hands back to a
//! paused request. [`CaseFixtures`] fabricates the payloads of the cases
//! collection endpoint: an empty list, a populated list, and a created record.

use crate::result::{FreezeError, FreezeResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default JSON content type
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A canned response. Immutable once built; the builders return new values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureResponse {
    status: u16,
    content_type: String,
    body: String,
    delay_ms: u64,
}

impl FixtureResponse {
    /// Create a response with an explicit content type
    #[must_use]
    pub fn new(status: u16, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body: body.into(),
            delay_ms: 0,
        }
    }

    /// Serialize `data` as a 200 JSON response
    pub fn json<T: Serialize>(data: &T) -> FreezeResult<Self> {
        let body = serde_json::to_string(data)?;
        Ok(Self::new(200, JSON_CONTENT_TYPE, body))
    }

    /// Use raw JSON text as the body; it must parse
    pub fn json_text(body: impl Into<String>) -> FreezeResult<Self> {
        let response = Self::new(200, JSON_CONTENT_TYPE, body);
        response.validate()?;
        Ok(response)
    }

    /// Plain-text response
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(200, "text/plain", body)
    }

    /// JSON error payload `{"error": message}`
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string();
        Self::new(status, JSON_CONTENT_TYPE, body)
    }

    /// Set status code
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set delivery delay
    #[must_use]
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// HTTP status code
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Content type header value
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Body text
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Delay before delivery, in milliseconds
    #[must_use]
    pub const fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Delay before delivery
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Whether the declared content type is JSON (`application/json`, `+json`)
    #[must_use]
    pub fn is_json(&self) -> bool {
        let essence = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        essence == JSON_CONTENT_TYPE || essence.ends_with("+json")
    }

    /// Check the body is well-formed for the declared content type
    pub fn validate(&self) -> FreezeResult<()> {
        if self.content_type.trim().is_empty() {
            return Err(FreezeError::MalformedFixture {
                content_type: String::new(),
                message: "content type must not be empty".to_string(),
            });
        }
        if self.is_json() {
            serde_json::from_str::<serde_json::Value>(&self.body).map_err(|e| {
                FreezeError::MalformedFixture {
                    content_type: self.content_type.clone(),
                    message: e.to_string(),
                }
            })?;
        }
        Ok(())
    }
}

// ============================================================================
// Cases collection contract
// ============================================================================

/// Lifecycle status of a case record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    /// Newly created
    Draft,
    /// Files being analysed
    Analyzing,
    /// Ready for review
    Ready,
    /// Being processed
    Processing,
    /// Finished
    Completed,
}

/// One record of the cases collection endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    /// Record id
    pub id: String,
    /// Human-facing case code, e.g. `AWM-2025-0001`
    pub case_code: String,
    /// Status
    pub status: CaseStatus,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
    /// Attached files
    pub files: Vec<serde_json::Value>,
}

impl CaseRecord {
    /// A draft record with no files
    #[must_use]
    pub fn draft(id: impl Into<String>, case_code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            case_code: case_code.into(),
            status: CaseStatus::Draft,
            created_at: "2024-05-23T10:00:00Z".to_string(),
            files: Vec::new(),
        }
    }

    /// Set status
    #[must_use]
    pub fn with_status(mut self, status: CaseStatus) -> Self {
        self.status = status;
        self
    }

    /// Set creation timestamp
    #[must_use]
    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = created_at.into();
        self
    }
}

/// Builders for the cases collection payloads
#[derive(Debug, Clone, Copy)]
pub struct CaseFixtures;

impl CaseFixtures {
    /// `GET` answered with `[]`
    pub fn empty_list() -> FreezeResult<FixtureResponse> {
        FixtureResponse::json(&Vec::<CaseRecord>::new())
    }

    /// `GET` answered with the given records
    pub fn list(records: &[CaseRecord]) -> FreezeResult<FixtureResponse> {
        FixtureResponse::json(&records)
    }

    /// `POST` answered with the newly created record
    pub fn created(record: &CaseRecord) -> FreezeResult<FixtureResponse> {
        FixtureResponse::json(record)
    }

    /// Records with the given codes, ids derived from position
    #[must_use]
    pub fn records(codes: &[&str]) -> Vec<CaseRecord> {
        codes
            .iter()
            .enumerate()
            .map(|(i, code)| CaseRecord::draft(format!("case-{}", i + 1), *code))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod fixture_response_tests {
        use super::*;

        #[test]
        fn test_json_response() {
            let response = FixtureResponse::json(&serde_json::json!({"ok": true})).unwrap();
            assert_eq!(response.status(), 200);
            assert_eq!(response.content_type(), JSON_CONTENT_TYPE);
            assert_eq!(response.body(), r#"{"ok":true}"#);
            assert_eq!(response.delay_ms(), 0);
        }

        #[test]
        fn test_builders_do_not_mutate_original() {
            let base = FixtureResponse::text("hi");
            let slow = base.clone().with_delay(250).with_status(201);
            assert_eq!(base.delay_ms(), 0);
            assert_eq!(slow.delay(), Duration::from_millis(250));
            assert_eq!(slow.status(), 201);
        }

        #[test]
        fn test_malformed_json_rejected() {
            let err = FixtureResponse::json_text("{not json").unwrap_err();
            assert_eq!(err.kind(), "MalformedFixture");

            let raw = FixtureResponse::new(200, "application/json; charset=utf-8", "[1,");
            assert!(raw.validate().is_err());
        }

        #[test]
        fn test_non_json_body_not_parsed() {
            let html = FixtureResponse::new(200, "text/html", "<p>{oops</p>");
            assert!(html.validate().is_ok());
        }

        #[test]
        fn test_vendor_json_is_json() {
            let problem = FixtureResponse::new(400, "application/problem+json", "nope");
            assert!(problem.is_json());
            assert!(problem.validate().is_err());
        }

        #[test]
        fn test_error_payload() {
            let response = FixtureResponse::error(500, "Database Error");
            assert_eq!(response.status(), 500);
            assert!(response.validate().is_ok());
            assert!(response.body().contains("Database Error"));
        }
    }

    mod case_fixture_tests {
        use super::*;

        #[test]
        fn test_empty_list() {
            let response = CaseFixtures::empty_list().unwrap();
            assert_eq!(response.body(), "[]");
        }

        #[test]
        fn test_record_wire_shape() {
            let record = CaseRecord::draft("case-123", "AWM-2025-0001");
            let value = serde_json::to_value(&record).unwrap();
            assert_eq!(value["caseCode"], "AWM-2025-0001");
            assert_eq!(value["status"], "DRAFT");
            assert_eq!(value["createdAt"], "2024-05-23T10:00:00Z");
            assert!(value["files"].as_array().unwrap().is_empty());
        }

        #[test]
        fn test_populated_list_parses_back() {
            let records = CaseFixtures::records(&["CASE-123", "CASE-456"]);
            let response = CaseFixtures::list(&records).unwrap();
            let parsed: Vec<CaseRecord> = serde_json::from_str(response.body()).unwrap();
            assert_eq!(parsed, records);
            assert_eq!(parsed[1].id, "case-2");
        }

        #[test]
        fn test_created_is_single_object() {
            let record = CaseRecord::draft("case-456", "AWM-2025-0002")
                .with_status(CaseStatus::Analyzing)
                .with_created_at("2024-05-23T10:05:00Z");
            let response = CaseFixtures::created(&record).unwrap().with_delay(2000);
            let value: serde_json::Value = serde_json::from_str(response.body()).unwrap();
            assert!(value.is_object());
            assert_eq!(value["status"], "ANALYZING");
            assert_eq!(response.delay_ms(), 2000);
        }
    }
}
