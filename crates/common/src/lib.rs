//! Virtgate Common Library
//!
//! Shared types and the error taxonomy for the Virtgate console proxy.

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;

/// Virtgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
