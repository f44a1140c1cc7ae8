//! Hypervisor domain lookup boundary
//!
//! Narrow capability interface over whichever hypervisor client the
//! management layer uses. The console core has no compile-time dependency
//! on a particular binding; it only needs name, UUID, and the domain
//! descriptor XML.

use async_trait::async_trait;
use virtgate_common::Result;

/// A resolved hypervisor domain. Dropped when no longer needed.
#[async_trait]
pub trait DomainHandle: Send + Sync {
    fn name(&self) -> &str;

    fn uuid(&self) -> &str;

    /// Domain descriptor XML, as returned by the hypervisor
    async fn xml_descriptor(&self) -> Result<String>;
}

/// Resolves a VM name or UUID to a domain handle.
///
/// Implementations return `Error::VmNotFound` when neither lookup matches.
#[async_trait]
pub trait DomainLookup: Send + Sync {
    async fn resolve(&self, name_or_uuid: &str) -> Result<Box<dyn DomainHandle>>;
}
