//! Backend host admission policy

/// Hosts the proxy is permitted to dial.
///
/// The descriptor-derived listen address drives the backend dial, so a
/// manipulated descriptor could otherwise coerce the proxy into reaching
/// arbitrary destinations. An empty configured set permits loopback only.
#[derive(Debug, Clone, Default)]
pub struct HostAllowlist {
    hosts: Vec<String>,
}

impl HostAllowlist {
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts }
    }

    /// Exact match against the configured set; loopback trio when empty
    pub fn allows(&self, host: &str) -> bool {
        if self.hosts.is_empty() {
            return matches!(host, "localhost" | "127.0.0.1" | "::1");
        }
        self.hosts.iter().any(|h| h == host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_loopback_only() {
        let policy = HostAllowlist::default();
        assert!(policy.allows("localhost"));
        assert!(policy.allows("127.0.0.1"));
        assert!(policy.allows("::1"));
        assert!(!policy.allows("10.0.0.5"));
        assert!(!policy.allows("example.com"));
        assert!(!policy.allows(""));
    }

    #[test]
    fn test_configured_set_is_exact() {
        let policy = HostAllowlist::new(vec!["vmhost1".to_string(), "10.0.0.5".to_string()]);
        assert!(policy.allows("vmhost1"));
        assert!(policy.allows("10.0.0.5"));
        // Configured set replaces the loopback default entirely
        assert!(!policy.allows("localhost"));
        assert!(!policy.allows("127.0.0.1"));
        assert!(!policy.allows("vmhost2"));
    }
}
