//! Inbound adapters (listeners)

mod http;

pub use http::HttpListener;

use crate::Result;
use async_trait::async_trait;

/// Trait for inbound listeners
#[async_trait]
pub trait InboundListener: Send + Sync {
    /// Get listener name
    fn name(&self) -> &str;

    /// Run the accept loop until stopped
    async fn start(&self) -> Result<()>;

    /// Stop accepting new connections
    async fn stop(&self) -> Result<()>;

    /// Check if listener is running
    fn is_running(&self) -> bool;
}
