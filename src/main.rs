//! proxypool-rust - CLI entry point

// Use mimalloc as global allocator for better p99 latency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use proxypool_rust::{App, Config, VERSION};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "proxypool-rust")]
#[command(version = VERSION)]
#[command(about = "Self-hosted free-proxy aggregator with rotating HTTP/SOCKS5 gateway")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// HTTP listener address (overrides config)
    #[arg(long = "http-listen")]
    http_listen: Option<String>,

    /// SOCKS5 listener address (overrides config)
    #[arg(long = "socks5-listen")]
    socks5_listen: Option<String>,

    /// Management API address (overrides config)
    #[arg(long = "ext-ctl")]
    external_controller: Option<String>,

    /// Auto-refresh interval in minutes (overrides config)
    #[arg(long = "auto-refresh")]
    auto_refresh_minutes: Option<u64>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    // Proxy workloads are latency-sensitive; keep polling overhead down.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .max_blocking_threads(32)
        .enable_all()
        .event_interval(61)
        .global_queue_interval(31)
        .thread_name("proxypool-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("proxypool_rust=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    info!("proxypool-rust v{}", VERSION);
    info!("loading configuration from: {}", args.config.display());

    let mut config = if args.config.exists() {
        match Config::load(&args.config) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("configuration file not found, using defaults");
        Config::default()
    };

    // Apply CLI overrides
    if let Some(listen) = args.http_listen {
        config.http.listen = listen;
    }
    if let Some(listen) = args.socks5_listen {
        config.socks5.listen = listen;
    }
    if let Some(ext_ctl) = args.external_controller {
        config.external_controller = Some(ext_ctl);
    }
    if let Some(minutes) = args.auto_refresh_minutes {
        config.auto_refresh_minutes = minutes;
    }

    if args.test {
        if let Err(e) = config.validate() {
            error!("configuration test failed: {}", e);
            std::process::exit(1);
        }
        info!("configuration test passed");
        return Ok(());
    }

    let app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("failed to initialize gateway: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("gateway error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
