//! Session identity and teardown coordination

mod coordinator;

pub use coordinator::{CleanupHandler, Coordinator};

use uuid::Uuid;

/// One run of the proxy.
///
/// Constructed once at startup and passed by reference; there is no
/// ambient global configuration. Only the proxy port is consumed here,
/// the other two belong to companion processes.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    pub proxy_port: u16,
    pub dashboard_port: u16,
    pub static_port: u16,
}

impl Session {
    pub fn new(proxy_port: u16, dashboard_port: u16, static_port: u16) -> Self {
        Session {
            id: Uuid::new_v4().to_string(),
            proxy_port,
            dashboard_port,
            static_port,
        }
    }

    /// Opaque session token, generated once at startup.
    pub fn id(&self) -> &str {
        &self.id
    }
}
