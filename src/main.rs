//! dohgate - CLI entry point

use clap::Parser;
use dohgate::{Config, Daemon, VERSION};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dohgate")]
#[command(version = VERSION)]
#[command(about = "Session-scoped local forward proxy with DoH resolution")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Proxy listener port (0 = OS-assigned)
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Control surface port (0 = OS-assigned)
    #[arg(long = "dashboard-port")]
    dashboard_port: Option<u16>,

    /// Companion static server port
    #[arg(long = "static-port")]
    static_port: Option<u16>,

    /// DoH endpoint serving the JSON answer format
    #[arg(long = "doh-endpoint")]
    doh_endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .enable_all()
        .thread_name("dohgate-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => match Config::load(path.to_str().unwrap_or_default()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    // CLI overrides
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(port) = args.dashboard_port {
        config.dashboard_port = port;
    }
    if let Some(port) = args.static_port {
        config.static_port = port;
    }
    if let Some(endpoint) = args.doh_endpoint {
        config.doh_endpoint = endpoint;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("dohgate={}", config.log_level).parse()?),
        )
        .init();

    info!("dohgate v{}", VERSION);

    let daemon = match Daemon::new(config).await {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    let coordinator = daemon.coordinator();

    // An uncaught panic anywhere is a termination trigger, not something
    // to recover from. The hook funnels it into the same one-shot latch
    // as signals and the remote shutdown request.
    let panic_notify = daemon.shutdown_notify();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        panic_notify.notify_one();
    }));

    if let Err(e) = daemon.run().await {
        error!("daemon error: {}", e);
    }

    // Normal exit still funnels through the latch; a no-op if run()
    // already completed the pass.
    coordinator.shutdown().await;
    info!("session ended");
    Ok(())
}
