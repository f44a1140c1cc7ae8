//! Background sweep of expired tokens and idle connections

use crate::registry::ConnectionRegistry;
use crate::token::TokenRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fixed-tick cleanup loop with an explicit stop lifecycle
pub struct Reaper {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<ConnectionRegistry>,
}

impl Reaper {
    /// Spawn the sweep loop
    pub fn spawn(
        tokens: Arc<TokenRegistry>,
        registry: Arc<ConnectionRegistry>,
        interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let loop_registry = registry.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick is a harmless no-op sweep
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let swept = tokens.sweep();
                        let evicted = loop_registry.evict_idle(idle_timeout);
                        if swept > 0 || evicted > 0 {
                            debug!(swept, evicted, "reaper sweep");
                        }
                    }
                }
            }
        });

        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
            registry,
        }
    }

    /// Stop the loop, wait for it to exit, then close every remaining
    /// tracked connection. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            let closed = self.registry.close_all();
            if closed > 0 {
                info!(closed, "closed remaining console connections on shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProxyConnection;
    use virtgate_common::{ConsoleEndpoint, ConsoleType};

    fn endpoint() -> ConsoleEndpoint {
        ConsoleEndpoint {
            console_type: ConsoleType::Vnc,
            host: "localhost".into(),
            port: 5900,
            tls_port: None,
            password: None,
        }
    }

    #[tokio::test]
    async fn test_reaper_sweeps_tokens_and_idle_connections() {
        let tokens = Arc::new(TokenRegistry::new(Duration::from_millis(1)));
        let registry = Arc::new(ConnectionRegistry::new(5, 100));

        tokens.issue("vm1", "uuid-1", endpoint());
        let conn = ProxyConnection::new("vm1", "uuid-1", ConsoleType::Vnc);
        registry.admit(&conn).unwrap();

        let reaper = Reaper::spawn(
            tokens.clone(),
            registry.clone(),
            Duration::from_millis(10),
            Duration::from_millis(5),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tokens.is_empty());
        assert!(registry.is_empty());
        assert!(conn.is_closed());

        reaper.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_remaining_connections() {
        let tokens = Arc::new(TokenRegistry::new(Duration::from_secs(60)));
        let registry = Arc::new(ConnectionRegistry::new(5, 100));

        let conn = ProxyConnection::new("vm1", "uuid-1", ConsoleType::Vnc);
        registry.admit(&conn).unwrap();

        let reaper = Reaper::spawn(
            tokens.clone(),
            registry.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );

        reaper.stop().await;
        assert!(registry.is_empty());
        assert!(conn.is_closed());

        // Second stop is a no-op
        reaper.stop().await;
    }
}
