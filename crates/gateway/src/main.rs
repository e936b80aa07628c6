use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use shaman_domain::config::{Config, ConfigSeverity};
use shaman_gateway::api;
use shaman_gateway::state::AppBuilder;

#[derive(Parser)]
#[command(name = "shaman", about = "Multi-tenant A2A agent orchestration platform")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "shaman.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run both persona servers and the workers (default).
    Serve,
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the configuration and exit non-zero on errors.
    Validate,
    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            run_server(Arc::new(config)).await
        }
        Some(Command::Config {
            command: ConfigCommand::Validate,
        }) => {
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("configuration OK");
            Ok(())
        }
        Some(Command::Config {
            command: ConfigCommand::Show,
        }) => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("shaman {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    let config = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        Config::default()
    };
    Ok(config.with_env_overrides())
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().or_else(|_| {
                std::env::var("LOG_LEVEL")
                    .map(EnvFilter::new)
                    .or_else(|_| Ok::<_, std::convert::Infallible>(EnvFilter::new(
                        "info,shaman_gateway=debug",
                    )))
            })
            .expect("building env filter"),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("shaman starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Services ─────────────────────────────────────────────────────
    let state = AppBuilder::new(config.clone()).build();
    tracing::info!(
        worker_concurrency = config.queue.worker_concurrency,
        max_depth = config.limits.max_depth,
        "scheduler + workers ready"
    );

    // ── Listeners ────────────────────────────────────────────────────
    let public_addr = format!("{}:{}", config.server.host, config.server.public_port);
    let internal_addr = format!("{}:{}", config.server.host, config.server.internal_port);

    let public_listener = tokio::net::TcpListener::bind(&public_addr)
        .await
        .with_context(|| format!("binding public persona to {public_addr}"))?;
    let internal_listener = tokio::net::TcpListener::bind(&internal_addr)
        .await
        .with_context(|| format!("binding internal persona to {internal_addr}"))?;

    tracing::info!(addr = %public_addr, "public persona listening");
    tracing::info!(addr = %internal_addr, "internal persona listening");

    // ── Graceful shutdown ────────────────────────────────────────────
    // One signal drains the queue consumers first, then closes both
    // listeners; persistence is in-memory and torn down on drop.
    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        let queue = state.queue.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::error!("failed to listen for shutdown signal");
                return;
            }
            tracing::info!("shutdown signal received, draining workers");
            queue.shutdown().await;
            stop.cancel();
        });
    }

    let cors_layer = build_cors_layer(&config.server.cors);
    let max_concurrent = std::env::var("SHAMAN_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);

    let public = {
        let stop = stop.clone();
        let router = api::public_router(state.clone())
            .layer(cors_layer.clone())
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
        async move {
            axum::serve(
                public_listener,
                router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
        }
    };

    let internal = {
        let stop = stop.clone();
        let router = api::internal_router(state.clone())
            .layer(cors_layer)
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
        async move {
            axum::serve(
                internal_listener,
                router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
        }
    };

    tokio::try_join!(public, internal).context("server error")?;
    tracing::info!("shaman stopped");
    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may use a trailing `*` wildcard for the port segment
/// (`http://localhost:*`); a literal `"*"` allows all origins.
fn build_cors_layer(cors: &shaman_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            axum::http::HeaderName::from_static("x-api-key"),
        ]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            // The remainder after a wildcard prefix must be digits only,
            // so "http://localhost:3000.evil.com" cannot slip through.
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            axum::http::HeaderName::from_static("x-api-key"),
        ])
}
