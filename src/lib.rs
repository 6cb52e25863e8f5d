//! HTTP API behind the marketplace frontend.
//!
//! # Dashboard
//! `GET /api/dashboard` serves marketplace statistics from a keyed cache that
//! treats an entry as fresh for `--cache-ttl` seconds (5 minutes by default).
//! Responses carry `X-Cache: HIT|MISS`, `X-Cache-Remaining`, `Cache-Control`
//! and `Expires`.
//!
//! # Rate limiting
//! Every route sits behind a per-IP fixed window (100 requests per minute).
//! The dashboard adds a stricter window (20 per minute) that only counts
//! requests arriving while the cache is cold, so polling a warm dashboard is
//! never throttled but a burst of regenerations is.
//!
//! # Auth
//! A mock account store: login against a seeded demo user, registration with
//! an emailed (here: logged) OTP, and bearer sessions.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{get, post},
};
use tokio::{net::TcpListener, signal, time::sleep};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod state;
pub mod stats;

use config::{Args, DEFAULT_CORS_ORIGIN};
use handlers::{
    X_CACHE, X_CACHE_REMAINING, dashboard_handler, health_handler, login_handler, me_handler,
    metrics_handler, not_found_handler, register_handler, verify_otp_handler,
};
use state::AppState;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Builds the full router around an already constructed state.
pub fn app(state: Arc<AppState>) -> Router {
    let dashboard = Router::new()
        .route("/api/dashboard", get(dashboard_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::dashboard_limit,
        ));

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/register", post(register_handler))
        .route("/api/auth/verify-otp", post(verify_otp_handler))
        .route("/api/auth/me", get(me_handler))
        .merge(dashboard)
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::global_limit,
        ))
        .layer(CatchPanicLayer::custom(error::handle_panic));

    if state.config.environment.is_development() {
        router = router.layer(middleware::map_response(error::expose_error_detail));
    }

    router
        .layer(middleware::from_fn(metrics::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origin))
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let origin = origin.parse::<HeaderValue>().unwrap_or_else(|e| {
        warn!("Invalid CORS origin {origin:?} ({e}), falling back to {DEFAULT_CORS_ORIGIN}");
        HeaderValue::from_static(DEFAULT_CORS_ORIGIN)
    });

    CorsLayer::new()
        // foreign origins get no Access-Control-Allow-Origin
        .allow_origin(AllowOrigin::list([origin]))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .expose_headers([X_CACHE, X_CACHE_REMAINING])
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60))
}

/// Binds, retrying `retries` more times after the first failure.
pub async fn bind_with_retry(addr: &str, retries: u32, delay: Duration) -> std::io::Result<TcpListener> {
    let mut attempt = 0;

    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!("Failed to bind {addr}: {e} (retry {attempt}/{retries} in {delay:?})");
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn run(args: Args) -> Result<(), BoxError> {
    let state = AppState::new(args);
    let config = &state.config;

    let address = format!("0.0.0.0:{}", config.port);
    info!("Binding to {address}");
    let listener = bind_with_retry(
        &address,
        config.bind_retries,
        Duration::from_secs(config.bind_retry_delay),
    )
    .await?;

    info!("Server running on http://localhost:{}", config.port);
    info!("Environment: {:?}", config.environment);
    info!("CORS origin: {}", config.cors_origin);
    info!("Dashboard cache TTL: {} seconds", config.cache_ttl);
    info!(
        "Rate limits: {} global / {} dashboard requests per {} seconds",
        config.global_limit, config.dashboard_limit, config.rate_window
    );
    info!("Dashboard stats source: {}", state.stats.describe());

    tokio::spawn(rate_limit::cleanup_task(
        state.clone(),
        state.config.rate_window().max(Duration::from_secs(1)),
    ));

    let app = app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install terminate handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_gives_up_after_retry_budget() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let result = bind_with_retry(&addr, 2, Duration::from_millis(10)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn bind_succeeds_once_port_is_released() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let release = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            drop(taken);
        });

        let listener = bind_with_retry(&addr, 20, Duration::from_millis(25)).await;
        release.await.unwrap();
        assert!(listener.is_ok());
    }
}
