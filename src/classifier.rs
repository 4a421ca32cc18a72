//! C1 — Error Classifier: a pure function deciding retryable vs terminal
//! for any error the executor sees (spec.md §4.1).

use crate::job::ErrorKind;

/// The fields a raw error is classified on. Constructed by the executor from
/// whatever a handler or overlay surfaced — never produced by I/O itself.
#[derive(Debug, Clone, Default)]
pub struct ClassifiableError {
    pub code: Option<String>,
    pub status_code: Option<u16>,
    pub message: String,
}

impl ClassifiableError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Retryable,
    NonRetryable,
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub category: Category,
    pub reason: &'static str,
    pub suggested_delay_ms: u64,
    pub kind: ErrorKind,
}

impl Classification {
    pub fn is_retryable(&self) -> bool {
        self.category == Category::Retryable
    }
}

const NON_RETRYABLE_CODES: &[&str] = &[
    "ENOENT", "ENOTDIR", "EISDIR", "EACCES", "EPERM", "EINVAL", "EEXIST", "ENOTFOUND",
    "ECONNREFUSED",
];

const RETRYABLE_CODES: &[&str] = &[
    "ETIMEDOUT", "ECONNRESET", "EHOSTUNREACH", "ENETUNREACH", "EPIPE", "EAGAIN", "EBUSY",
];

const RETRYABLE_MESSAGE_PATTERNS: &[&str] = &[
    "timeout",
    "connection reset",
    "temporarily unavailable",
    "try again",
    "rate limit",
];

const NON_RETRYABLE_MESSAGE_PATTERNS: &[&str] = &[
    "invalid repository path",
    "not a git repository",
    "permission denied",
    "authentication failed",
    "validation error",
];

/// Classify a raw error into a retry/terminal decision with a suggested
/// backoff. Pure, deterministic, no I/O (spec.md §4.1, §8 property 7).
pub fn classify(err: &ClassifiableError) -> Classification {
    if let Some(code) = err.code.as_deref() {
        if NON_RETRYABLE_CODES.contains(&code) {
            return Classification {
                category: Category::NonRetryable,
                reason: "non-retryable error code",
                suggested_delay_ms: 0,
                kind: ErrorKind::HandlerPermanent,
            };
        }
        if RETRYABLE_CODES.contains(&code) {
            return Classification {
                category: Category::Retryable,
                reason: "transient network error code",
                suggested_delay_ms: 10_000,
                kind: ErrorKind::HandlerTransient,
            };
        }
    }

    if let Some(status) = err.status_code {
        if status == 429 {
            return Classification {
                category: Category::Retryable,
                reason: "rate limited",
                suggested_delay_ms: 60_000,
                kind: ErrorKind::HandlerTransient,
            };
        }
        if (400..500).contains(&status) {
            return Classification {
                category: Category::NonRetryable,
                reason: "client HTTP error",
                suggested_delay_ms: 0,
                kind: ErrorKind::HandlerPermanent,
            };
        }
        if (500..600).contains(&status) {
            return Classification {
                category: Category::Retryable,
                reason: "server HTTP error",
                suggested_delay_ms: 10_000,
                kind: ErrorKind::HandlerTransient,
            };
        }
    }

    let lower = err.message.to_lowercase();
    for pattern in NON_RETRYABLE_MESSAGE_PATTERNS {
        if lower.contains(pattern) {
            return Classification {
                category: Category::NonRetryable,
                reason: "non-retryable message pattern",
                suggested_delay_ms: 0,
                kind: ErrorKind::HandlerPermanent,
            };
        }
    }
    for pattern in RETRYABLE_MESSAGE_PATTERNS {
        if lower.contains(pattern) {
            let delay = if *pattern == "rate limit" { 60_000 } else { 10_000 };
            return Classification {
                category: Category::Retryable,
                reason: "retryable message pattern",
                suggested_delay_ms: delay,
                kind: ErrorKind::HandlerTransient,
            };
        }
    }

    // Conservative fallback: unknown errors are assumed transient.
    Classification {
        category: Category::Retryable,
        reason: "unclassified error, conservative default",
        suggested_delay_ms: 5_000,
        kind: ErrorKind::HandlerTransient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_errors_are_non_retryable() {
        for code in ["ENOENT", "EACCES", "EPERM", "EISDIR"] {
            let c = classify(&ClassifiableError::new("boom").with_code(code));
            assert_eq!(c.category, Category::NonRetryable, "{code}");
        }
    }

    #[test]
    fn transient_network_codes_are_retryable() {
        for code in ["ETIMEDOUT", "ECONNRESET", "EBUSY"] {
            let c = classify(&ClassifiableError::new("boom").with_code(code));
            assert_eq!(c.category, Category::Retryable, "{code}");
        }
    }

    #[test]
    fn http_429_is_retryable_with_60s_delay() {
        let c = classify(&ClassifiableError::new("slow down").with_status(429));
        assert!(c.is_retryable());
        assert_eq!(c.suggested_delay_ms, 60_000);
    }

    #[test]
    fn http_4xx_non_retryable_5xx_retryable() {
        let client_err = classify(&ClassifiableError::new("bad request").with_status(404));
        assert!(!client_err.is_retryable());

        let server_err = classify(&ClassifiableError::new("oops").with_status(503));
        assert!(server_err.is_retryable());
    }

    #[test]
    fn message_patterns_override_when_no_code() {
        let c = classify(&ClassifiableError::new("connection reset by peer"));
        assert!(c.is_retryable());

        let c = classify(&ClassifiableError::new("authentication failed for user"));
        assert!(!c.is_retryable());
    }

    #[test]
    fn unknown_errors_default_to_retryable() {
        let c = classify(&ClassifiableError::new("something unexpected happened"));
        assert!(c.is_retryable());
        assert_eq!(c.suggested_delay_ms, 5_000);
    }

    #[test]
    fn classification_is_pure() {
        let err = ClassifiableError::new("timeout waiting for response").with_code("ETIMEDOUT");
        let a = classify(&err);
        let b = classify(&err);
        assert_eq!(a.category, b.category);
        assert_eq!(a.suggested_delay_ms, b.suggested_delay_ms);
    }
}
