//! Console service
//!
//! Composition root and the surface exposed to the routing/WebSocket
//! layer. All state is explicitly owned here and passed by reference to
//! the session handler and reaper; nothing is process-global.

use crate::config::ConsoleProxyConfig;
use crate::discovery::ConsoleDiscovery;
use crate::domain::DomainLookup;
use crate::proxy::{ClientStream, StreamProxy};
use crate::reaper::Reaper;
use crate::registry::ConnectionRegistry;
use crate::token::TokenRegistry;
use std::sync::Arc;
use tracing::info;
use virtgate_common::{ConsoleInfo, ConsoleType, MultiConsoleResponse, ProxyStats, Result};

pub struct ConsoleService {
    tokens: Arc<TokenRegistry>,
    registry: Arc<ConnectionRegistry>,
    discovery: ConsoleDiscovery,
    proxy: StreamProxy,
    reaper: Reaper,
}

impl ConsoleService {
    /// Build the service and start its background reaper
    pub fn new(config: ConsoleProxyConfig, lookup: Arc<dyn DomainLookup>) -> Self {
        let tokens = Arc::new(TokenRegistry::new(config.token_ttl));
        let registry = Arc::new(ConnectionRegistry::new(
            config.max_connections_per_vm,
            config.max_total_connections,
        ));
        let discovery = ConsoleDiscovery::new(lookup, tokens.clone());
        let proxy = StreamProxy::new(tokens.clone(), registry.clone(), config.clone());
        let reaper = Reaper::spawn(
            tokens.clone(),
            registry.clone(),
            config.cleanup_interval,
            config.idle_timeout,
        );

        info!(
            max_per_vm = config.max_connections_per_vm,
            max_total = config.max_total_connections,
            "console service started"
        );

        Self {
            tokens,
            registry,
            discovery,
            proxy,
            reaper,
        }
    }

    /// All console types available for a VM, each with a fresh token
    pub async fn list_available_consoles(
        &self,
        name_or_uuid: &str,
    ) -> Result<MultiConsoleResponse> {
        self.discovery.list_available(name_or_uuid).await
    }

    /// Console info for a specific type, or the preferred one when `None`
    pub async fn get_console(
        &self,
        name_or_uuid: &str,
        console_type: Option<ConsoleType>,
    ) -> Result<ConsoleInfo> {
        let console_type = match console_type {
            Some(t) => t,
            None => {
                let consoles = self.discovery.list_available(name_or_uuid).await?;
                if consoles.preferred.as_deref() == Some("spice") {
                    ConsoleType::Spice
                } else {
                    ConsoleType::Vnc
                }
            }
        };
        self.discovery.get_by_type(name_or_uuid, console_type).await
    }

    /// Relay a post-upgrade duplex client stream; the upgrade handshake is
    /// the caller's job
    pub async fn upgrade_and_relay<S>(&self, client: S, token_value: &str) -> Result<()>
    where
        S: ClientStream + 'static,
    {
        self.proxy.handle_session(client, token_value).await
    }

    /// Close every console connection for a VM (e.g. on VM shutdown)
    pub fn close_vm_consoles(&self, vm_name: &str) -> usize {
        self.registry.close_all_for_vm(vm_name)
    }

    /// Live connection count for a VM
    pub fn get_active_connections(&self, vm_name: &str) -> usize {
        self.registry.active_for_vm(vm_name)
    }

    /// Statistics snapshot for observability export
    pub fn stats(&self) -> ProxyStats {
        let mut stats = self.registry.stats();
        stats.total_tokens = self.tokens.len();
        stats
    }

    /// Graceful shutdown: stop the reaper, then close all remaining
    /// connections
    pub async fn stop(&self) {
        self.reaper.stop().await;
        info!("console service stopped");
    }
}
