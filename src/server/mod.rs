pub mod handlers;
pub mod rate_limit;
pub mod state;
pub mod url_validation;

use crate::config::Config;
use crate::metrics;
use axum::{
    Router,
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use state::AppState;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

/// Header carrying the crate version on every response
const VERSION_HEADER: &str = "x-relay-version";

/// Build the router for the given configuration
pub async fn build_router(config: Config) -> Router {
    router(AppState::new(config))
}

/// Build the router over already-wired state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .route("/api/songs", get(handlers::songs::latest_songs))
        .route("/api/songs/{slug}", get(handlers::songs::get_song))
        .route("/sitemap.xml", get(handlers::sitemap::sitemap_index))
        .route("/sitemap/{page}", get(handlers::sitemap::sitemap_page))
        .route(
            "/api/revalidate",
            get(handlers::revalidate::revalidate_get).post(handlers::revalidate::revalidate_post),
        )
        .route(
            "/api/revalidate-sitemap",
            post(handlers::revalidate::revalidate_sitemap),
        )
        .route("/api/cache-stats", get(handlers::cache_admin::cache_stats))
        .route("/api/cache-clear", delete(handlers::cache_admin::cache_clear))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_middleware,
        ))
        .layer(middleware::from_fn(track_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Metric label for a request path; bounded so label cardinality stays fixed
fn endpoint_label(path: &str) -> &'static str {
    match path {
        "/" | "/health" => "health",
        "/metrics" => "metrics",
        "/api/songs" => "latest_songs",
        "/sitemap.xml" => "sitemap_index",
        "/api/revalidate" => "revalidate",
        "/api/revalidate-sitemap" => "revalidate_sitemap",
        "/api/cache-stats" => "cache_stats",
        "/api/cache-clear" => "cache_clear",
        p if p.starts_with("/api/songs/") => "song",
        p if p.starts_with("/sitemap/") => "sitemap_page",
        _ => "other",
    }
}

/// Count and time every request, and stamp the version header
async fn track_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let endpoint = endpoint_label(req.uri().path());

    let mut response = next.run(req).await;

    metrics::record_request(endpoint, response.status().as_u16());
    metrics::record_duration(endpoint, start);
    response.headers_mut().insert(
        VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Periodically drop expired store entries, rendered outputs and closed
/// rate-limit windows until `token` is cancelled
pub fn spawn_sweeper(state: AppState, every: Duration, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // First tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Cache sweeper stopped");
                    break;
                }
                _ = interval.tick() => {
                    let store = state.cache.sweep_expired();
                    let rendered = state.output.sweep_expired();
                    let windows = state
                        .rate_limiter
                        .as_ref()
                        .map_or(0, |limiter| limiter.cleanup());
                    debug!(
                        "Sweep removed {} store entries, {} rendered outputs, {} rate-limit windows",
                        store, rendered, windows
                    );
                }
            }
        }
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);
    let sweep = config.sweep_interval();

    let state = AppState::new(config);
    info!("Snapshot tiers: {:?}", state.songs.tier_names());
    match state.config.rate_limit_rpm {
        0 => info!("Rate limiting disabled"),
        rpm => info!("Rate limiting at {} requests/minute per client", rpm),
    }

    let token = CancellationToken::new();
    let sweeper = sweep.map(|every| spawn_sweeper(state.clone(), every, token.clone()));

    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("Server listening on http://{}", addr);

    let shutdown = token.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, draining connections");
            shutdown.cancel();
        })
        .await;

    token.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }

    if let Err(e) = served {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
