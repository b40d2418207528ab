//! Exactly-once shutdown latch

use crate::Result;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// A deferred teardown action registered by whoever owns a releasable
/// resource (listener socket, subprocess handle, ...).
pub type CleanupHandler = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Owns the ordered list of cleanup handlers and guarantees the pass runs
/// at most once per session.
///
/// Every termination source (OS signal, panic hook, remote shutdown
/// request, normal exit) calls [`Coordinator::shutdown`]; the first caller
/// wins the latch and runs the handlers in registration order, the rest
/// return immediately. A handler's failure is logged and never prevents
/// the remaining handlers from running.
pub struct Coordinator {
    handlers: Mutex<Vec<(String, CleanupHandler)>>,
    latched: AtomicBool,
}

impl Coordinator {
    pub fn new() -> Self {
        Coordinator {
            handlers: Mutex::new(Vec::new()),
            latched: AtomicBool::new(false),
        }
    }

    /// Append a cleanup handler. Registration is a startup-time activity;
    /// anything registered after the latch has fired is dropped.
    pub fn register<F, Fut>(&self, name: &str, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.latched.load(Ordering::SeqCst) {
            warn!("ignoring cleanup handler '{}' registered after shutdown", name);
            return;
        }
        self.handlers
            .lock()
            .push((name.to_string(), Box::new(move || Box::pin(f()))));
        debug!("registered cleanup handler '{}'", name);
    }

    /// Run every registered handler exactly once, in registration order.
    /// Concurrent and repeated calls observe the latch and return.
    pub async fn shutdown(&self) {
        if self.latched.swap(true, Ordering::SeqCst) {
            debug!("shutdown already latched");
            return;
        }

        let handlers = std::mem::take(&mut *self.handlers.lock());
        info!("shutting down, {} cleanup handlers", handlers.len());

        for (name, handler) in handlers {
            if let Err(e) = handler().await {
                warn!("cleanup handler '{}' failed: {}", name, e);
            }
        }

        info!("cleanup complete");
    }

    pub fn is_shut_down(&self) -> bool {
        self.latched.load(Ordering::SeqCst)
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}
