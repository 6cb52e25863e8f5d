use axum::{
    Json,
    extract::{Request, State},
    http::{
        HeaderName,
        header::{CACHE_CONTROL, EXPIRES},
    },
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheEntry, DASHBOARD_CACHE_KEY, FreshEntry};
use crate::error::AppError;
use crate::metrics::{CACHE_HITS, CACHE_MISSES};
use crate::state::AppState;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CACHE_REMAINING: HeaderName = HeaderName::from_static("x-cache-remaining");

pub async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    mut req: Request,
) -> Result<Response, AppError> {
    let ttl = state.cache.ttl();

    // an entry the limiter already let through uncounted is served as is
    let fresh = req
        .extensions_mut()
        .remove::<FreshEntry>()
        .map(|FreshEntry(entry)| entry)
        .or_else(|| state.cache.get_fresh(DASHBOARD_CACHE_KEY));

    if let Some(entry) = fresh {
        CACHE_HITS.inc();
        debug!("Dashboard cache HIT");
        return Ok(dashboard_response(&entry, ttl, "HIT"));
    }

    CACHE_MISSES.inc();
    info!(
        "Dashboard cache MISS - generating stats from {}",
        state.stats.describe()
    );

    // two misses racing here both regenerate, the later set wins
    let stats = state.stats.generate().await?;
    let entry = state
        .cache
        .set(DASHBOARD_CACHE_KEY, serde_json::to_value(&stats)?);

    Ok(dashboard_response(&entry, ttl, "MISS"))
}

fn dashboard_response(entry: &CacheEntry, ttl: Duration, status: &'static str) -> Response {
    let remaining = entry.remaining_secs(ttl);

    let expires = DateTime::<Utc>::from_timestamp_millis(entry.timestamp + ttl.as_millis() as i64)
        .unwrap_or_else(Utc::now)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();

    let body = Json(serde_json::json!({
        "success": true,
        "data": entry.data,
        "cachedAt": entry.timestamp,
    }));

    (
        [
            (CACHE_CONTROL, format!("public, max-age={remaining}")),
            (EXPIRES, expires),
            (X_CACHE, status.to_string()),
            (X_CACHE_REMAINING, remaining.to_string()),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use axum::body::Body;

    #[tokio::test(start_paused = true)]
    async fn entry_admitted_as_fresh_is_served_even_if_it_expires_meanwhile() {
        let state = AppState::new(Args::default());
        let entry = state
            .cache
            .set(DASHBOARD_CACHE_KEY, serde_json::json!({ "totalOrders": 1 }));

        // expires between the limiter's check and the handler
        tokio::time::advance(state.cache.ttl()).await;

        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(FreshEntry(entry.clone()));

        let res = dashboard_handler(State(state.clone()), req).await.unwrap();
        assert_eq!(res.headers()[X_CACHE], "HIT");
        assert_eq!(
            state.cache.get(DASHBOARD_CACHE_KEY).unwrap().created_at,
            entry.created_at
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_without_admission_is_regenerated() {
        let state = AppState::new(Args::default());
        state.cache.set(DASHBOARD_CACHE_KEY, serde_json::json!({}));
        tokio::time::advance(state.cache.ttl()).await;

        let res = dashboard_handler(State(state.clone()), Request::new(Body::empty()))
            .await
            .unwrap();
        assert_eq!(res.headers()[X_CACHE], "MISS");
    }
}
