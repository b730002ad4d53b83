//! Storage Container Manager
//!
//! Control plane daemon: accepts datanode heartbeats, forms replication
//! pipelines and allocates containers over a REST API.

use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_container_manager::{
    ApiServer, ApiServerConfig, ControlPlane, Error, NodeRegistry, PlacementPolicyKind, Result,
    ScmConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Container Manager - pipeline and container control plane
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, short, env = "SCM_CONFIG")]
    config: Option<PathBuf>,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:9860")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Placement policy (capacity, rack_aware)
    #[arg(long, env = "SCM_PLACEMENT")]
    placement: Option<String>,

    /// Containers per pipeline before a new pipeline is formed
    #[arg(long, env = "SCM_CONTAINER_LIMIT")]
    container_limit: Option<usize>,

    /// Skip forming baseline pipelines at startup
    #[arg(long, env = "SCM_NO_STARTUP_PIPELINES")]
    no_startup_pipelines: bool,

    /// REST request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "30")]
    request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Storage Container Manager");
    info!("  Version: {}", storage_container_manager::VERSION);
    info!("  REST API: {}", args.api_addr);

    let config = load_config(&args)?;
    info!("  Placement: {}", config.placement);
    info!("  Container limit per pipeline: {}", config.container_limit_per_pipeline);

    // Create node registry
    let registry = NodeRegistry::new();
    info!("Node registry initialized (64-way sharded)");

    // Create control plane
    let control_plane = ControlPlane::new(config, registry)?;
    let _events = control_plane.spawn_event_handler();
    let formed = control_plane.start();
    info!("Control plane started ({} baseline pipeline(s))", formed);

    let _sweeper = control_plane.spawn_stale_node_sweeper();

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_cp = control_plane.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_cp).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_cp = control_plane.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_cp).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Create and run API server
    let api_config = ApiServerConfig {
        rest_addr: args.api_addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid REST API address: {}", e))
        })?,
        request_timeout_secs: args.request_timeout_secs,
    };

    let api_server = Arc::new(ApiServer::new(api_config, control_plane.clone()));
    let server = api_server.clone();
    let mut api_handle = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = &mut api_handle => {
            result.map_err(|e| Error::Internal(format!("API server task failed: {}", e)))??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            api_server.shutdown();
            api_handle
                .await
                .map_err(|e| Error::Internal(format!("API server task failed: {}", e)))??;
        }
    }

    info!("Storage Container Manager shutdown complete");
    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> Result<ScmConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ScmConfig::from_file(path)?
        }
        None => ScmConfig::default(),
    };

    if let Some(placement) = &args.placement {
        config.placement = placement.parse::<PlacementPolicyKind>()?;
    }
    if let Some(limit) = args.container_limit {
        config.container_limit_per_pipeline = limit;
    }
    if args.no_startup_pipelines {
        config.create_pipelines_on_startup = false;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "tower_http=info", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

fn plain_response(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, control_plane: Arc<ControlPlane>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let control_plane = control_plane.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let ready = control_plane.is_ready();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => plain_response(StatusCode::OK, "ok"),
                        "/readyz" if ready => plain_response(StatusCode::OK, "ok"),
                        "/readyz" => plain_response(StatusCode::SERVICE_UNAVAILABLE, "no datanodes online"),
                        _ => plain_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, control_plane: Arc<ControlPlane>) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let control_plane = control_plane.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let control_plane = control_plane.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match control_plane.encode_metrics() {
                            Ok((content_type, buffer)) => {
                                let mut response = plain_response(StatusCode::OK, buffer);
                                if let Ok(value) = HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                plain_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                            }
                        },
                        _ => plain_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
