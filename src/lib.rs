//! dohgate - session-scoped local forward proxy with DoH resolution
//!
//! Routes plaintext HTTP and CONNECT-tunneled HTTPS through a
//! DNS-over-HTTPS resolution step, shielding hostname lookups from
//! plaintext DNS interception. Built to live for one browsing session and
//! disappear completely: every listener is registered with a coordinator
//! that guarantees exactly-once teardown whether termination comes from a
//! signal, a panic, or a remote shutdown request.
//!
//! # Architecture
//!
//! ```text
//!  client ──► inbound/ (HTTP + CONNECT) ──► dns/ (DoH + fallback)
//!                     │                            │
//!                     └────── upstream dial ◄──────┘
//!
//!  hub/ (control surface) ──► session/ (coordinator latch)
//! ```

pub mod common;
pub mod config;
pub mod dns;
pub mod hub;
pub mod inbound;
pub mod session;

pub use common::error::{Error, Result};
pub use config::Config;

use inbound::{HttpListener, InboundListener};
use session::{Coordinator, Session};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Daemon instance owning the session's resources.
pub struct Daemon {
    session: Session,
    coordinator: Arc<Coordinator>,
    shutdown_notify: Arc<Notify>,
    proxy: Arc<HttpListener>,
    hub_listener: TcpListener,
}

impl Daemon {
    /// Bind all sockets and assemble the components. Ports left at 0 in
    /// the config are resolved to OS-picked ones here, so the session
    /// value always carries the real port numbers.
    pub async fn new(config: Config) -> Result<Self> {
        info!("initializing dohgate v{}", VERSION);

        let resolver = Arc::new(dns::Resolver::new(
            &config.doh_endpoint,
            config.doh_timeout(),
        )?);

        let proxy = Arc::new(
            HttpListener::bind(
                SocketAddr::new(config.bind_address, config.port),
                resolver.clone(),
            )
            .await?,
        );

        let hub_listener =
            TcpListener::bind(SocketAddr::new(config.bind_address, config.dashboard_port)).await?;

        let session = Session::new(
            proxy.local_addr().port(),
            hub_listener.local_addr()?.port(),
            config.static_port,
        );
        info!("session {} created", session.id());

        Ok(Daemon {
            session,
            coordinator: Arc::new(Coordinator::new()),
            shutdown_notify: Arc::new(Notify::new()),
            proxy,
            hub_listener,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    /// Handle external termination triggers (panic hook, embedding code)
    /// can use to request the one-shot teardown.
    pub fn shutdown_notify(&self) -> Arc<Notify> {
        self.shutdown_notify.clone()
    }

    /// Run until a termination trigger fires, then execute the cleanup
    /// pass. Returns after cleanup; the caller decides the exit.
    pub async fn run(self) -> Result<()> {
        let Daemon {
            session,
            coordinator,
            shutdown_notify,
            proxy,
            hub_listener,
        } = self;

        let proxy_task = {
            let proxy = proxy.clone();
            tokio::spawn(async move {
                if let Err(e) = proxy.start().await {
                    warn!("proxy listener error: {}", e);
                }
            })
        };

        let state = hub::AppState::new(session.clone(), coordinator.clone(), shutdown_notify.clone());
        let hub_task = tokio::spawn(async move {
            if let Err(e) = hub::start_server(state, hub_listener).await {
                warn!("control surface error: {}", e);
            }
        });

        // Teardown order: stop accepting first, then drop the accept and
        // control tasks. In-flight relays drain on their own.
        {
            let proxy = proxy.clone();
            coordinator.register("proxy listener", move || async move { proxy.stop().await });
        }
        coordinator.register("proxy accept task", move || async move {
            proxy_task.abort();
            Ok(())
        });
        coordinator.register("control surface", move || async move {
            hub_task.abort();
            Ok(())
        });

        info!(
            "session {} ready: proxy 127.0.0.1:{}, control 127.0.0.1:{}",
            session.id(),
            session.proxy_port,
            session.dashboard_port
        );

        wait_for_termination(&shutdown_notify).await?;
        coordinator.shutdown().await;
        Ok(())
    }
}

/// Block until any termination source fires: interrupt, SIGTERM, or the
/// in-process notify handle (remote request, panic hook).
async fn wait_for_termination(notify: &Notify) -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received interrupt"),
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = notify.notified() => info!("shutdown requested"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received interrupt"),
            _ = notify.notified() => info!("shutdown requested"),
        }
    }

    Ok(())
}
