//! Wire types for the scoring endpoint and the single point where its
//! responses are classified into a tagged outcome. Nothing downstream ever
//! sees an untyped response blob.

use attribution_core::types::TransformedRecord;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Request body for one batch submission.
#[derive(Debug, Serialize)]
pub struct ScoringRequest<'a> {
    pub customer_journeys: &'a [TransformedRecord],
    pub redistribution_parameter: serde_json::Value,
}

/// Default redistribution parameters per the provider documentation.
pub fn default_redistribution_parameter() -> serde_json::Value {
    json!({
        "initializer": {
            "direction": "earlier_sessions_only",
            "receive_threshold": 0,
            "redistribution_channel_labels": ["Direct", "Email_NewsLetter"],
        },
        "holder": {
            "direction": "any_session",
            "receive_threshold": 0,
            "redistribution_channel_labels": ["Direct", "Email_NewsLetter"],
        },
        "closer": {
            "direction": "later_sessions_only",
            "receive_threshold": 0.1,
            "redistribution_channel_labels": ["Direct"],
        },
    })
}

/// One scored session from the response `value` list.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionScore {
    #[serde(default)]
    pub conversion_id: String,
    pub session_id: String,
    #[serde(default)]
    pub ihc: f64,
}

/// One per-session rejection reported alongside scored sessions.
#[derive(Debug, Clone, Deserialize)]
pub struct PartialFailure {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversion_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body shape of a 200/206 response. The provider versions this contract;
/// unknown fields are ignored so additive changes never break parsing.
#[derive(Debug, Deserialize)]
struct ScoringResponseBody {
    #[serde(rename = "statusCode", default)]
    status_code: Option<u16>,
    #[serde(default)]
    value: Vec<SessionScore>,
    #[serde(rename = "partialFailureErrors", default)]
    partial_failure_errors: Vec<PartialFailure>,
}

/// Every batch submission resolves to exactly one of these at the client
/// boundary.
#[derive(Debug)]
pub enum ApiOutcome {
    /// HTTP success with a usable body; `failures` covers per-session
    /// rejections from a mixed (206-style) response.
    Scored {
        scores: Vec<SessionScore>,
        failures: Vec<PartialFailure>,
    },
    /// Non-success HTTP status. `retryable` distinguishes rate limiting and
    /// server errors from validation rejections.
    Rejected {
        status: u16,
        retryable: bool,
        detail: String,
    },
    /// HTTP success but the body could not be understood.
    Malformed(String),
}

/// Classify one HTTP response. 200/206 parse the body; 429 and 5xx are
/// retryable; every other 4xx is a permanent rejection.
pub fn classify(status: u16, body: &str) -> ApiOutcome {
    match status {
        200 | 206 => parse_success_body(body),
        429 => ApiOutcome::Rejected {
            status,
            retryable: true,
            detail: format!("rate limited (429): {}", truncate(body)),
        },
        500..=599 => ApiOutcome::Rejected {
            status,
            retryable: true,
            detail: format!("server error ({status}): {}", truncate(body)),
        },
        _ => ApiOutcome::Rejected {
            status,
            retryable: false,
            detail: format!("rejected ({status}): {}", truncate(body)),
        },
    }
}

fn parse_success_body(body: &str) -> ApiOutcome {
    let parsed: ScoringResponseBody = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => return ApiOutcome::Malformed(format!("unparseable body: {e}")),
    };

    if let Some(code) = parsed.status_code {
        if code != 200 && code != 206 {
            return ApiOutcome::Malformed(format!("embedded statusCode {code}"));
        }
    }
    if parsed.value.is_empty() && parsed.partial_failure_errors.is_empty() {
        return ApiOutcome::Malformed("response carried no scores and no errors".to_string());
    }
    ApiOutcome::Scored {
        scores: parsed.value,
        failures: parsed.partial_failure_errors,
    }
}

/// Scores are an opaque oracle output; the client only guarantees they are
/// finite and inside `[0, 1]` before persistence.
pub fn clean_score(score: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    score.clamp(0.0, 1.0)
}

fn truncate(body: &str) -> &str {
    let cut = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_body_parses_scores() {
        let body = r#"{"statusCode":200,"value":[
            {"conversion_id":"c1","session_id":"s1","ihc":0.4},
            {"conversion_id":"c1","session_id":"s2","ihc":0.6}
        ]}"#;
        match classify(200, body) {
            ApiOutcome::Scored { scores, failures } => {
                assert_eq!(scores.len(), 2);
                assert!(failures.is_empty());
                assert_eq!(scores[0].session_id, "s1");
            }
            other => panic!("expected Scored, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let body = r#"{"statusCode":200,"apiVersion":"2.3","requestUnits":17,
            "value":[{"session_id":"s1","ihc":1.0,"confidence":0.9}]}"#;
        assert!(matches!(classify(200, body), ApiOutcome::Scored { .. }));
    }

    #[test]
    fn test_partial_failures_are_surfaced() {
        let body = r#"{"statusCode":206,
            "value":[{"session_id":"s1","ihc":0.5}],
            "partialFailureErrors":[{"session_id":"s2","error":"invalid journey"}]}"#;
        match classify(206, body) {
            ApiOutcome::Scored { scores, failures } => {
                assert_eq!(scores.len(), 1);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].session_id.as_deref(), Some("s2"));
            }
            other => panic!("expected Scored, got {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_and_server_errors_are_retryable() {
        assert!(matches!(
            classify(429, "slow down"),
            ApiOutcome::Rejected { retryable: true, .. }
        ));
        assert!(matches!(
            classify(503, "unavailable"),
            ApiOutcome::Rejected { retryable: true, .. }
        ));
    }

    #[test]
    fn test_validation_errors_are_permanent() {
        assert!(matches!(
            classify(400, "bad journey"),
            ApiOutcome::Rejected {
                retryable: false,
                ..
            }
        ));
        assert!(matches!(
            classify(401, "bad key"),
            ApiOutcome::Rejected {
                retryable: false,
                ..
            }
        ));
    }

    #[test]
    fn test_unusable_success_body_is_malformed() {
        assert!(matches!(classify(200, "<html>"), ApiOutcome::Malformed(_)));
        assert!(matches!(
            classify(200, r#"{"statusCode":200}"#),
            ApiOutcome::Malformed(_)
        ));
        assert!(matches!(
            classify(200, r#"{"statusCode":500,"value":[{"session_id":"s"}]}"#),
            ApiOutcome::Malformed(_)
        ));
    }

    #[test]
    fn test_clean_score_bounds() {
        assert_eq!(clean_score(0.42), 0.42);
        assert_eq!(clean_score(1.7), 1.0);
        assert_eq!(clean_score(-0.3), 0.0);
        assert_eq!(clean_score(f64::NAN), 0.0);
        assert_eq!(clean_score(f64::INFINITY), 0.0);
    }
}
