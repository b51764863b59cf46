//! Ordered classification rules
//!
//! Rules are evaluated top to bottom and the first match wins. A rendered
//! status code decides the kind before any body keyword is looked at, so
//! "HTTP 503 ... invalid session" stays a server error and "HTTP 403 ...
//! timed out" stays a permission error. Keyword rules only apply to
//! messages that carry no status code.

use super::classification::{
    ClassificationTemplate, ErrorCategory, ErrorKind, RetryStrategy, Severity,
};
use regex::Regex;

/// One row of the rule table
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub template: ClassificationTemplate,
    patterns: Vec<Regex>,
}

impl ClassificationRule {
    fn new(template: ClassificationTemplate, patterns: &[&str]) -> Self {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)).expect("static classification pattern"))
            .collect();
        Self { template, patterns }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }
}

/// Matches a status code only where it reads as one ("HTTP 403", "status: 403")
fn status(code: u16) -> String {
    format!(r"\b(?:http|status(?: code)?)[\s:=]*{}\b", code)
}

fn template(
    kind: ErrorKind,
    category: ErrorCategory,
    severity: Severity,
    retry_strategy: RetryStrategy,
    max_retries: u32,
    base_delay_ms: u64,
) -> ClassificationTemplate {
    ClassificationTemplate {
        kind,
        category,
        severity,
        retry_strategy,
        max_retries,
        base_delay_ms,
    }
}

/// Fallback for errors that match no rule
pub fn unknown_template(max_retries_cap: u32, base_delay_ms: u64) -> ClassificationTemplate {
    template(
        ErrorKind::Unknown,
        ErrorCategory::Mixed,
        Severity::Error,
        RetryStrategy::ExponentialBackoff,
        2.min(max_retries_cap),
        base_delay_ms,
    )
}

/// Build the rule table, capping every retry budget at `max_retries_cap`
pub fn default_rules(max_retries_cap: u32) -> Vec<ClassificationRule> {
    use ErrorCategory::*;
    use ErrorKind::*;
    use RetryStrategy::*;

    let cap = |n: u32| n.min(max_retries_cap);
    let (s400, s401, s403, s422, s429) = (status(400), status(401), status(403), status(422), status(429));
    let s5xx = r"\b(?:http|status(?: code)?)[\s:=]*50[0-4]\b";

    let permission = template(Permission, Permanent, Severity::Critical, NoRetry, 0, 0);
    let authentication = template(Authentication, Transient, Severity::Error, TokenRefresh, cap(3), 1000);
    let rate_limit = template(RateLimit, Transient, Severity::Warning, ExponentialBackoff, cap(5), 5000);
    let validation = template(Validation, Permanent, Severity::Error, NoRetry, 0, 0);
    let server = template(Server, Transient, Severity::Error, ExponentialBackoff, cap(3), 3000);

    vec![
        // Explicit status codes
        ClassificationRule::new(permission, &[s403.as_str()]),
        ClassificationRule::new(authentication, &[s401.as_str()]),
        ClassificationRule::new(rate_limit, &[s429.as_str()]),
        ClassificationRule::new(server, &[s5xx]),
        ClassificationRule::new(validation, &[s400.as_str(), s422.as_str()]),
        // Keywords
        ClassificationRule::new(
            permission,
            &[
                r"\bforbidden\b",
                r"permission denied",
                r"access denied",
                r"\beacces\b",
                r"\beperm\b",
                r"not authorized to",
            ],
        ),
        ClassificationRule::new(
            authentication,
            &[
                r"unauthori[sz]ed",
                r"invalid (?:api )?(?:token|key|credentials)",
                r"token (?:has )?expired",
                r"authentication (?:failed|required)",
            ],
        ),
        ClassificationRule::new(
            rate_limit,
            &[
                r"rate.?limit",
                r"too many requests",
                r"quota exceeded",
                r"throttl",
            ],
        ),
        ClassificationRule::new(
            template(Integration, Mixed, Severity::Error, ApiRefresh, cap(2), 3000),
            &[
                r"unexpected response",
                r"invalid response (?:format|body|shape)",
                r"error decoding response body",
                r"schema mismatch",
                r"unsupported api version",
            ],
        ),
        ClassificationRule::new(
            validation,
            &[
                r"bad request",
                r"unprocessable",
                r"validation",
                r"\binvalid\b",
                r"malformed",
                r"required field",
                r"constraint failed",
            ],
        ),
        ClassificationRule::new(
            template(Network, Transient, Severity::Warning, ExponentialBackoff, cap(5), 2000),
            &[
                r"timed? ?out",
                r"\beconnreset\b",
                r"\beconnrefused\b",
                r"\benotfound\b",
                r"\betimedout\b",
                r"connection (?:reset|refused|closed|aborted)",
                r"socket hang up",
                r"broken pipe",
                r"error sending request",
                r"dns",
                r"network",
            ],
        ),
        ClassificationRule::new(
            server,
            &[
                r"internal server error",
                r"bad gateway",
                r"service unavailable",
                r"database is (?:locked|busy)",
            ],
        ),
        ClassificationRule::new(
            template(Resource, Transient, Severity::Critical, MemoryCleanup, cap(2), 5000),
            &[
                r"out of memory",
                r"\benomem\b",
                r"\bemfile\b",
                r"too many open files",
                r"memory allocation",
                r"\bheap\b",
            ],
        ),
        ClassificationRule::new(
            template(Filesystem, Mixed, Severity::Error, FilesystemCheck, cap(2), 2000),
            &[
                r"\benoent\b",
                r"\benospc\b",
                r"\berofs\b",
                r"no such file",
                r"no space left",
                r"disk full",
                r"read-only file ?system",
                r"unable to open database file",
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_match(rules: &[ClassificationRule], text: &str) -> Option<ErrorKind> {
        rules
            .iter()
            .find(|r| r.matches(text))
            .map(|r| r.template.kind)
    }

    #[test]
    fn test_status_codes_need_context() {
        let rules = default_rules(5);
        assert_eq!(
            first_match(&rules, "HTTP 403 Forbidden: nope"),
            Some(ErrorKind::Permission)
        );
        assert_eq!(first_match(&rules, "status: 429"), Some(ErrorKind::RateLimit));
        assert_eq!(
            first_match(&rules, "HTTP 503 Service Unavailable"),
            Some(ErrorKind::Server)
        );
        // A bare number in unrelated text is not a status code
        assert_eq!(first_match(&rules, "order 403 shipped late"), None);
    }

    #[test]
    fn test_rule_order_resolves_overlaps() {
        let rules = default_rules(5);
        // "invalid token" must not fall through to validation
        assert_eq!(
            first_match(&rules, "invalid token supplied"),
            Some(ErrorKind::Authentication)
        );
        // 403 that also mentions a timeout is still permission
        assert_eq!(
            first_match(&rules, "HTTP 403 Forbidden: upstream timed out"),
            Some(ErrorKind::Permission)
        );
        assert_eq!(
            first_match(&rules, "error decoding response body: expected value"),
            Some(ErrorKind::Integration)
        );
    }

    #[test]
    fn test_status_code_beats_body_keywords() {
        let rules = default_rules(5);
        for text in [
            r#"HTTP 503 Service Unavailable: {"error":"invalid session state, retry later"}"#,
            "HTTP 500 Internal Server Error: validation service timed out",
            "HTTP 502 Bad Gateway: upstream returned malformed headers",
        ] {
            assert_eq!(first_match(&rules, text), Some(ErrorKind::Server), "{}", text);
        }
        assert_eq!(
            first_match(&rules, "HTTP 429 Too Many Requests: invalid burst"),
            Some(ErrorKind::RateLimit)
        );
        assert_eq!(
            first_match(&rules, "HTTP 422 Unprocessable Entity: network_id is required"),
            Some(ErrorKind::Validation)
        );
        // Without a status code the keywords still decide
        assert_eq!(
            first_match(&rules, "record 17: malformed date_ordered"),
            Some(ErrorKind::Validation)
        );
    }

    #[test]
    fn test_retry_cap_applies() {
        let rules = default_rules(1);
        for rule in &rules {
            assert!(rule.template.max_retries <= 1);
        }
        assert_eq!(unknown_template(1, 5000).max_retries, 1);
        assert_eq!(unknown_template(5, 5000).max_retries, 2);
    }
}
