//! Core types for the Virtgate console proxy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Console type (remote framebuffer protocol)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleType {
    Vnc,
    Spice,
}

impl ConsoleType {
    /// Parse a console type from its wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vnc" => Some(ConsoleType::Vnc),
            "spice" => Some(ConsoleType::Spice),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleType::Vnc => "vnc",
            ConsoleType::Spice => "spice",
        }
    }
}

impl std::fmt::Display for ConsoleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved console endpoint for a single graphics device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleEndpoint {
    pub console_type: ConsoleType,
    pub host: String,
    pub port: u16,
    pub tls_port: Option<u16>,
    pub password: Option<String>,
}

impl ConsoleEndpoint {
    /// Dial address for the backend framebuffer server
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Console connection information returned to API clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleInfo {
    #[serde(rename = "type")]
    pub console_type: ConsoleType,
    pub host: String,
    pub port: u16,
    /// Masked indicator only; the real password never leaves the service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub token: String,
    pub ws_path: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub tls_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_port: Option<u16>,
}

/// Availability of each console type for a VM
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleAvailability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vnc: Option<ConsoleInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spice: Option<ConsoleInfo>,
}

/// All available console options for a VM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiConsoleResponse {
    pub vm_name: String,
    pub vm_uuid: String,
    /// Console type names with a usable endpoint, e.g. ["vnc", "spice"]
    pub available: Vec<String>,
    pub consoles: ConsoleAvailability,
    /// Suggested console type (SPICE when present, else VNC)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred: Option<String>,
}

/// Per-connection byte counters within a stats snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub id: String,
    pub vm_name: String,
    #[serde(rename = "type")]
    pub console_type: ConsoleType,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// Proxy statistics snapshot for observability export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyStats {
    pub total_connections: usize,
    pub total_tokens: usize,
    pub connections_per_vm: HashMap<String, usize>,
    pub connections: Vec<ConnectionStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_type_parse() {
        assert_eq!(ConsoleType::parse("vnc"), Some(ConsoleType::Vnc));
        assert_eq!(ConsoleType::parse("SPICE"), Some(ConsoleType::Spice));
        assert_eq!(ConsoleType::parse("serial"), None);
    }

    #[test]
    fn test_console_type_serde() {
        assert_eq!(
            serde_json::to_string(&ConsoleType::Spice).unwrap(),
            "\"spice\""
        );
        let t: ConsoleType = serde_json::from_str("\"vnc\"").unwrap();
        assert_eq!(t, ConsoleType::Vnc);
    }

    #[test]
    fn test_console_info_password_masked_field() {
        let info = ConsoleInfo {
            console_type: ConsoleType::Vnc,
            host: "localhost".into(),
            port: 5900,
            password: None,
            token: "abc".into(),
            ws_path: "/ws".into(),
            expires_at: Utc::now(),
            tls_enabled: false,
            tls_port: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("tls_port"));
        assert!(json.contains("\"type\":\"vnc\""));
    }

    #[test]
    fn test_endpoint_addr() {
        let ep = ConsoleEndpoint {
            console_type: ConsoleType::Vnc,
            host: "localhost".into(),
            port: 5901,
            tls_port: None,
            password: None,
        };
        assert_eq!(ep.addr(), "localhost:5901");
    }
}
