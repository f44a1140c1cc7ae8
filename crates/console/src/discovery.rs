//! Console discovery
//!
//! Composes domain lookup, descriptor parsing, and token issuance into the
//! list of consoles a client may open. Every returned console carries a
//! freshly minted single-use token; repeated discovery mints new ones.

use crate::domain::DomainLookup;
use crate::graphics;
use crate::token::TokenRegistry;
use std::sync::Arc;
use tracing::debug;
use virtgate_common::{
    ConsoleEndpoint, ConsoleInfo, ConsoleType, Error, MultiConsoleResponse, Result,
};

const MASKED_PASSWORD: &str = "********";

pub struct ConsoleDiscovery {
    lookup: Arc<dyn DomainLookup>,
    tokens: Arc<TokenRegistry>,
}

impl ConsoleDiscovery {
    pub fn new(lookup: Arc<dyn DomainLookup>, tokens: Arc<TokenRegistry>) -> Self {
        Self { lookup, tokens }
    }

    /// List every console type the VM exposes, with a fresh token each
    pub async fn list_available(&self, name_or_uuid: &str) -> Result<MultiConsoleResponse> {
        let domain = self.lookup.resolve(name_or_uuid).await?;
        let xml = domain.xml_descriptor().await?;

        let devices = graphics::parse_graphics_devices(&xml)?;
        if devices.is_empty() {
            return Err(Error::NoConsoleAvailable);
        }

        let mut response = MultiConsoleResponse {
            vm_name: domain.name().to_string(),
            vm_uuid: domain.uuid().to_string(),
            available: Vec::new(),
            consoles: Default::default(),
            preferred: None,
        };

        for endpoint in graphics::resolve_endpoints(&devices) {
            let info = self.build_info(domain.name(), domain.uuid(), &endpoint);
            match endpoint.console_type {
                ConsoleType::Vnc if response.consoles.vnc.is_none() => {
                    response.consoles.vnc = Some(info);
                    response.available.push("vnc".to_string());
                }
                ConsoleType::Spice if response.consoles.spice.is_none() => {
                    response.consoles.spice = Some(info);
                    response.available.push("spice".to_string());
                }
                _ => {}
            }
        }

        if response.available.is_empty() {
            return Err(Error::NoUsableConsole);
        }

        // SPICE is the richer protocol when both are present
        response.preferred = if response.consoles.spice.is_some() {
            Some("spice".to_string())
        } else {
            Some("vnc".to_string())
        };

        debug!(
            vm = %response.vm_name,
            available = ?response.available,
            "discovered consoles"
        );
        Ok(response)
    }

    /// Console info for one specific type
    pub async fn get_by_type(
        &self,
        name_or_uuid: &str,
        console_type: ConsoleType,
    ) -> Result<ConsoleInfo> {
        let consoles = self.list_available(name_or_uuid).await?;
        let info = match console_type {
            ConsoleType::Vnc => consoles.consoles.vnc,
            ConsoleType::Spice => consoles.consoles.spice,
        };
        info.ok_or(Error::NoConsoleAvailable)
    }

    fn build_info(&self, vm_name: &str, vm_uuid: &str, endpoint: &ConsoleEndpoint) -> ConsoleInfo {
        let token = self.tokens.issue(vm_name, vm_uuid, endpoint.clone());
        ConsoleInfo {
            console_type: endpoint.console_type,
            host: endpoint.host.clone(),
            port: endpoint.port,
            // Indicate a password is set without revealing it
            password: endpoint.password.as_ref().map(|_| MASKED_PASSWORD.to_string()),
            ws_path: format!(
                "/api/v1/virtualization/computes/{}/console/{}/ws?token={}",
                vm_uuid, endpoint.console_type, token.value
            ),
            token: token.value,
            expires_at: token.expires_at,
            tls_enabled: endpoint.tls_port.is_some(),
            tls_port: endpoint.tls_port,
        }
    }
}
