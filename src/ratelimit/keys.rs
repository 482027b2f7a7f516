//! Storage key scheme and fixed-window arithmetic.

/// Prefix applied to every storage key unless configured otherwise.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit:";

/// Separator between the caller key and the window epoch.
///
/// `|` rather than `:` so caller keys holding colons (IPv6, `user:command`)
/// stay unambiguous.
pub const WINDOW_DELIMITER: char = '|';

/// Index of the fixed window containing `now_ms`.
pub fn window_epoch(now_ms: u64, window_ms: u64) -> u64 {
    now_ms / window_ms.max(1)
}

/// Epoch milliseconds at which window `epoch` ends.
pub fn window_end_ms(epoch: u64, window_ms: u64) -> u64 {
    epoch.saturating_add(1).saturating_mul(window_ms)
}

/// Window length rounded up to whole seconds, at least one.
pub fn ttl_seconds(window_ms: u64) -> u64 {
    window_ms.div_ceil(1000).max(1)
}

/// Key for a counter whose window is carried by its TTL.
pub fn counter_key(prefix: &str, caller_key: &str) -> String {
    format!("{}{}", prefix, caller_key)
}

/// A caller key pinned to one fixed window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// The caller supplied key
    pub caller_key: String,
    /// Window epoch (`floor(now / window_ms)`)
    pub window: u64,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(caller_key: &str, window: u64) -> Self {
        Self {
            caller_key: caller_key.to_string(),
            window,
        }
    }

    /// Format: `{prefix}{caller_key}|{window}`
    pub fn to_storage_key(&self, prefix: &str) -> String {
        format!(
            "{}{}{}{}",
            prefix, self.caller_key, WINDOW_DELIMITER, self.window
        )
    }

    /// Prefix shared by every window of `caller_key`.
    pub fn caller_prefix(prefix: &str, caller_key: &str) -> String {
        format!("{}{}{}", prefix, caller_key, WINDOW_DELIMITER)
    }

    /// Parse a storage key produced by [`WindowKey::to_storage_key`].
    pub fn from_storage_key(prefix: &str, key: &str) -> Option<Self> {
        let rest = key.strip_prefix(prefix)?;

        // Split from the right; caller keys may contain the delimiter.
        let last_sep = rest.rfind(WINDOW_DELIMITER)?;
        let window: u64 = rest[last_sep + 1..].parse().ok()?;

        Some(Self {
            caller_key: rest[..last_sep].to_string(),
            window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_epoch_and_end() {
        assert_eq!(window_epoch(0, 60_000), 0);
        assert_eq!(window_epoch(59_999, 60_000), 0);
        assert_eq!(window_epoch(60_000, 60_000), 1);
        assert_eq!(window_end_ms(1, 60_000), 120_000);
    }

    #[test]
    fn test_ttl_seconds_rounds_up() {
        assert_eq!(ttl_seconds(60_000), 60);
        assert_eq!(ttl_seconds(1_500), 2);
        assert_eq!(ttl_seconds(1), 1);
    }

    #[test]
    fn test_window_key_round_trip_with_ipv6() {
        let key = WindowKey::new("2001:db8::1", 28_333_333);
        let storage_key = key.to_storage_key(DEFAULT_KEY_PREFIX);
        assert_eq!(storage_key, "ratelimit:2001:db8::1|28333333");

        let parsed = WindowKey::from_storage_key(DEFAULT_KEY_PREFIX, &storage_key).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_window_key_parsing_invalid() {
        assert!(WindowKey::from_storage_key("ratelimit:", "other:u1|5").is_none());
        assert!(WindowKey::from_storage_key("ratelimit:", "ratelimit:u1").is_none());
        assert!(WindowKey::from_storage_key("ratelimit:", "ratelimit:u1|abc").is_none());
    }

    #[test]
    fn test_caller_prefix_does_not_match_longer_keys() {
        let prefix = WindowKey::caller_prefix("rl:", "u1");
        assert!(WindowKey::new("u1", 3).to_storage_key("rl:").starts_with(&prefix));
        assert!(!WindowKey::new("u10", 3).to_storage_key("rl:").starts_with(&prefix));
    }
}
