//! Console proxy configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the console proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleProxyConfig {
    /// Maximum concurrent relay sessions per VM
    pub max_connections_per_vm: usize,

    /// Maximum concurrent relay sessions across all VMs
    pub max_total_connections: usize,

    /// Lifetime of an access token from issuance to first use
    pub token_ttl: Duration,

    /// Bound on the backend TCP dial
    pub connect_timeout: Duration,

    /// A session with no forwarded bytes for this long is closed
    pub idle_timeout: Duration,

    /// Interval between client keepalive pings
    pub keepalive_interval: Duration,

    /// Backend hosts the proxy may dial; empty means loopback only
    pub allowed_hosts: Vec<String>,

    /// Relay copy buffer size in bytes
    pub buffer_size: usize,

    /// Interval between reaper sweeps
    pub cleanup_interval: Duration,
}

impl Default for ConsoleProxyConfig {
    fn default() -> Self {
        Self {
            max_connections_per_vm: 5,
            max_total_connections: 100,
            token_ttl: Duration::from_secs(5 * 60),
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(10 * 60),
            keepalive_interval: Duration::from_secs(30),
            allowed_hosts: vec![
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "::1".to_string(),
            ],
            buffer_size: 32 * 1024,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsoleProxyConfig::default();
        assert_eq!(config.max_connections_per_vm, 5);
        assert_eq!(config.max_total_connections, 100);
        assert_eq!(config.token_ttl, Duration::from_secs(300));
        assert_eq!(config.buffer_size, 32 * 1024);
        assert_eq!(config.allowed_hosts.len(), 3);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: ConsoleProxyConfig =
            serde_json::from_str(r#"{"max_connections_per_vm": 2}"#).unwrap();
        assert_eq!(config.max_connections_per_vm, 2);
        assert_eq!(config.max_total_connections, 100);
    }
}
