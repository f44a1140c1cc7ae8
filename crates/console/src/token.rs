//! Single-use console access tokens

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use virtgate_common::{ConsoleEndpoint, Error, Result};

/// A short-lived, single-use console access token
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Opaque 256-bit random value, hex encoded
    pub value: String,
    pub vm_name: String,
    pub vm_uuid: String,
    pub endpoint: ConsoleEndpoint,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    consumed: bool,
}

impl AccessToken {
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }
}

/// Issues and single-use-validates access tokens
pub struct TokenRegistry {
    tokens: Mutex<HashMap<String, AccessToken>>,
    ttl: ChronoDuration,
}

impl TokenRegistry {
    pub fn new(ttl: Duration) -> Self {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::minutes(5));
        Self {
            tokens: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh token for one console endpoint of one VM
    pub fn issue(&self, vm_name: &str, vm_uuid: &str, endpoint: ConsoleEndpoint) -> AccessToken {
        let now = Utc::now();
        let token = AccessToken {
            value: generate_token_value(),
            vm_name: vm_name.to_string(),
            vm_uuid: vm_uuid.to_string(),
            endpoint,
            issued_at: now,
            expires_at: now + self.ttl,
            consumed: false,
        };

        self.tokens
            .lock()
            .insert(token.value.clone(), token.clone());

        debug!(vm = vm_name, console_type = %token.endpoint.console_type, "issued console token");
        token
    }

    /// Validate a token value, consuming it on success.
    ///
    /// Validation is consumption: a token that validates once returns
    /// `TokenAlreadyUsed` on every later attempt. An expired token is
    /// evicted on the spot.
    pub fn validate(&self, value: &str) -> Result<AccessToken> {
        let mut tokens = self.tokens.lock();

        let token = tokens.get_mut(value).ok_or(Error::TokenInvalid)?;

        if Utc::now() >= token.expires_at {
            tokens.remove(value);
            return Err(Error::TokenExpired);
        }

        if token.consumed {
            return Err(Error::TokenAlreadyUsed);
        }

        token.consumed = true;
        Ok(token.clone())
    }

    /// Remove all expired tokens, returning how many were evicted
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, t| now < t.expires_at);
        before - tokens.len()
    }

    /// Number of live (issued, unexpired-or-unswept) tokens
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

fn generate_token_value() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtgate_common::ConsoleType;

    fn endpoint() -> ConsoleEndpoint {
        ConsoleEndpoint {
            console_type: ConsoleType::Vnc,
            host: "localhost".into(),
            port: 5900,
            tls_port: None,
            password: None,
        }
    }

    #[test]
    fn test_validate_consumes_token() {
        let registry = TokenRegistry::new(Duration::from_secs(60));
        let token = registry.issue("vm1", "uuid-1", endpoint());
        assert_eq!(token.value.len(), 64);
        assert!(!token.is_consumed());

        let validated = registry.validate(&token.value).unwrap();
        assert_eq!(validated.vm_name, "vm1");
        assert_eq!(validated.endpoint.port, 5900);

        // Second use fails, and keeps failing
        assert!(matches!(
            registry.validate(&token.value),
            Err(Error::TokenAlreadyUsed)
        ));
        assert!(matches!(
            registry.validate(&token.value),
            Err(Error::TokenAlreadyUsed)
        ));
    }

    #[test]
    fn test_validate_unknown_token() {
        let registry = TokenRegistry::new(Duration::from_secs(60));
        assert!(matches!(
            registry.validate("deadbeef"),
            Err(Error::TokenInvalid)
        ));
    }

    #[test]
    fn test_expired_token_is_evicted() {
        let registry = TokenRegistry::new(Duration::from_millis(1));
        let token = registry.issue("vm1", "uuid-1", endpoint());
        std::thread::sleep(Duration::from_millis(5));

        assert!(matches!(
            registry.validate(&token.value),
            Err(Error::TokenExpired)
        ));
        // Evicted on validation, so now unknown rather than expired
        assert!(matches!(
            registry.validate(&token.value),
            Err(Error::TokenInvalid)
        ));
    }

    #[test]
    fn test_sweep_removes_expired_only() {
        let short = TokenRegistry::new(Duration::from_millis(1));
        short.issue("vm1", "uuid-1", endpoint());
        short.issue("vm2", "uuid-2", endpoint());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(short.sweep(), 2);
        assert!(short.is_empty());

        let long = TokenRegistry::new(Duration::from_secs(60));
        long.issue("vm1", "uuid-1", endpoint());
        assert_eq!(long.sweep(), 0);
        assert_eq!(long.len(), 1);
    }

    #[test]
    fn test_token_values_are_unique() {
        let registry = TokenRegistry::new(Duration::from_secs(60));
        let a = registry.issue("vm1", "uuid-1", endpoint());
        let b = registry.issue("vm1", "uuid-1", endpoint());
        assert_ne!(a.value, b.value);
        assert_eq!(registry.len(), 2);
    }
}
