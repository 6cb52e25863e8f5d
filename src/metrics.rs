use axum::{extract::Request, middleware::Next, response::Response};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, register_counter, register_counter_vec, register_gauge,
    register_histogram,
};
use std::time::Instant;

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("gateway_requests_total", "Total number of requests").unwrap();
    pub static ref CACHE_HITS: Counter =
        register_counter!("gateway_dashboard_cache_hits_total", "Total dashboard cache hits").unwrap();
    pub static ref CACHE_MISSES: Counter =
        register_counter!("gateway_dashboard_cache_misses_total", "Total dashboard cache misses").unwrap();
    pub static ref RATE_LIMITED: CounterVec = register_counter_vec!(
        "gateway_rate_limited_total",
        "Requests rejected by a rate limiter",
        &["tier"]
    )
    .unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "gateway_request_latency_seconds",
        "Request latency in seconds"
    )
    .unwrap();
    pub static ref CACHE_SIZE: Gauge =
        register_gauge!("gateway_cache_size", "Current number of items in cache").unwrap();
}

// Counts every request and records its latency
pub async fn track_requests(req: Request, next: Next) -> Response {
    REQUEST_TOTAL.inc();
    let start_time = Instant::now();

    let res = next.run(req).await;

    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());
    res
}
