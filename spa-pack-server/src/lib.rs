//! Development server: serves a build's output directory and reverse-proxies
//! the paths named by the configured proxy rules.

pub mod proxy;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::middleware;
use axum::Router;
use spa_pack_rs::{BuildConfig, BuildEnvironment, ProxyRule};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use proxy::{Proxy, ProxyError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to create the proxy client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server stopped: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct DevServerOptions {
    pub output_root: PathBuf,
    pub environment: BuildEnvironment,
    pub proxy_rules: Vec<ProxyRule>,
    pub proxy_timeout: Duration,
}

impl DevServerOptions {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            output_root: config.output_root.clone(),
            environment: config.environment,
            proxy_rules: config.proxy_rules.clone(),
            proxy_timeout: Duration::from_secs(config.dev_server.proxy_timeout_secs),
        }
    }
}

/// Proxy rules are checked first, in declared order; any other request is
/// answered from the output root, with `index.html` for directories.
pub fn router(options: &DevServerOptions) -> Result<Router, ServerError> {
    let proxy = Proxy::new(&options.proxy_rules, options.environment, options.proxy_timeout)?;
    let files = ServeDir::new(&options.output_root).append_index_html_on_directories(true);

    Ok(Router::new()
        .fallback_service(files)
        .layer(middleware::from_fn_with_state(proxy, proxy::proxy_requests))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new()),
        ))
}

pub async fn bind(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let addr = format!("{host}:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serves until Ctrl-C.
pub async fn serve(listener: TcpListener, options: &DevServerOptions) -> Result<(), ServerError> {
    let app = router(options)?;
    if let Ok(addr) = listener.local_addr() {
        log_ready(addr, options);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)
}

fn log_ready(addr: SocketAddr, options: &DevServerOptions) {
    tracing::info!(
        "Serving {} on http://{addr} with {} proxy rules",
        options.output_root.display(),
        options.proxy_rules.len()
    );
    for rule in &options.proxy_rules {
        tracing::info!("  {} -> {}", rule.path, rule.target);
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutting down"),
        Err(err) => {
            tracing::warn!("Cannot listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    }
}
