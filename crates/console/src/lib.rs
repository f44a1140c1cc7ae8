//! Virtgate Console Proxy
//!
//! Token-brokered relay between framed client streams (WebSocket) and
//! VNC/SPICE framebuffer servers on the hypervisor host. The HTTP routing
//! and upgrade handshake live in the web layer; this crate receives the
//! post-upgrade duplex stream and handles everything from token validation
//! to exactly-once teardown.

pub mod allowlist;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod graphics;
pub mod proxy;
pub mod reaper;
pub mod registry;
pub mod service;
pub mod token;
pub mod ws;

pub use allowlist::HostAllowlist;
pub use config::ConsoleProxyConfig;
pub use discovery::ConsoleDiscovery;
pub use domain::{DomainHandle, DomainLookup};
pub use proxy::{ClientMessage, ClientStream, StreamProxy};
pub use registry::{ConnectionRegistry, ProxyConnection};
pub use service::ConsoleService;
pub use token::{AccessToken, TokenRegistry};
pub use ws::WsClientStream;
