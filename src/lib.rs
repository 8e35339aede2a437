pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod entities;
pub mod services;
pub mod state;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub use cli::{Cli, Commands};
pub use config::Config;

pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command_or_default() {
        Commands::Init => cmd_init(),
        Commands::CheckConfig => cmd_check_config(&config).await,
        Commands::Serve { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;

            let prometheus_handle = init_telemetry(&config)?;
            run_server(config, prometheus_handle).await
        }
    }
}

/// Installs the Prometheus recorder (when enabled) and the tracing subscriber.
fn init_telemetry(config: &Config) -> anyhow::Result<Option<PrometheusHandle>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        Some(handle)
    } else {
        None
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder();
        for (key, value) in &config.observability.loki_labels {
            builder = builder.label(key.as_str(), value.as_str())?;
        }
        let (layer, task) = builder.build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    if prometheus_handle.is_some() {
        info!("Prometheus metrics recorder initialized");
    }

    Ok(prometheus_handle)
}

async fn run_server(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    info!("useradmin v{} starting...", env!("CARGO_PKG_VERSION"));

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);

    let api_state = api::create_app_state_from_config(config, prometheus_handle).await?;
    let app = api::router(api_state).await?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Web server running at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Error listening for shutdown: {}", e),
    }
}

fn cmd_init() -> anyhow::Result<()> {
    if Config::create_default_if_missing()? {
        println!("Created config.toml with default settings.");
        println!("Set server.session_secret to a random string of at least 64 bytes.");
    } else {
        println!("config.toml already exists, leaving it untouched.");
    }
    Ok(())
}

async fn cmd_check_config(config: &Config) -> anyhow::Result<()> {
    config.validate()?;
    check_database(&config.general.database_path).await?;

    println!("Configuration OK");
    println!("  database:        {} (reachable)", config.general.database_path);
    println!(
        "  listen:          {}:{}",
        config.server.bind_address, config.server.port
    );
    println!("  secure cookies:  {}", config.server.secure_cookies);
    println!(
        "  session secret:  {}",
        if config.server.session_secret.is_some() {
            "configured"
        } else {
            "not set (random per start)"
        }
    );
    println!(
        "  metrics:         {}",
        if config.observability.metrics_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    Ok(())
}

/// Opens the database (applying migrations) and checks that it answers.
async fn check_database(database_url: &str) -> anyhow::Result<()> {
    let store = db::Store::with_pool_options(database_url, 1, 1)
        .await
        .with_context(|| format!("Cannot open database at {database_url}"))?;
    store.ping().await
}
