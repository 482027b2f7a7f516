//! HTTP response headers for a rate limit decision.

use super::types::RateLimitResult;

/// Effective limit for the window.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// Requests left in the window.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// Window end, Unix seconds.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// Seconds to wait, only on denial.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Header name/value pairs for `result`, in a stable order.
pub fn rate_limit_headers(result: &RateLimitResult) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        (HEADER_LIMIT, result.limit.to_string()),
        (HEADER_REMAINING, result.remaining.to_string()),
        (HEADER_RESET, result.reset_at_unix_secs().to_string()),
    ];

    if !result.allowed {
        if let Some(retry_after) = result.retry_after_secs {
            headers.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_headers() {
        let result = RateLimitResult::allowed(8, 3, 1_700_000_060_000);
        let headers = rate_limit_headers(&result);
        assert_eq!(
            headers,
            vec![
                ("X-RateLimit-Limit", "8".to_string()),
                ("X-RateLimit-Remaining", "3".to_string()),
                ("X-RateLimit-Reset", "1700000060".to_string()),
            ]
        );
    }

    #[test]
    fn test_denied_headers_include_retry_after() {
        let result = RateLimitResult::denied(5, 1_700_000_060_001, 1_700_000_000_000);
        let headers = rate_limit_headers(&result);
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[1], ("X-RateLimit-Remaining", "0".to_string()));
        assert_eq!(headers[2], ("X-RateLimit-Reset", "1700000061".to_string()));
        assert_eq!(headers[3], ("Retry-After", "61".to_string()));
    }
}
