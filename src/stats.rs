use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AppError;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

// Marketplace overview shown on the seller dashboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_products: u32,
    pub active_listings: u32,
    pub total_orders: u32,
    pub pending_orders: u32,
    pub total_revenue: f64,
    pub total_inquiries: u32,
    pub unread_messages: u32,
    pub active_buyers: u32,
    pub conversion_rate: f64,
    pub generated_at: String,
}

/// Where the dashboard numbers come from on a cache miss.
pub enum StatsSource {
    /// Placeholder numbers, used when no aggregation service is configured.
    Random,
    /// An aggregation service answering `GET <url>` with `DashboardStats` JSON.
    Upstream { client: reqwest::Client, url: String },
}

impl StatsSource {
    pub fn from_url(url: Option<String>) -> Self {
        match url {
            Some(url) if !url.trim().is_empty() => StatsSource::Upstream {
                client: reqwest::Client::new(),
                url: url.trim().to_string(),
            },
            _ => StatsSource::Random,
        }
    }

    pub fn describe(&self) -> &str {
        match self {
            StatsSource::Random => "random placeholder generator",
            StatsSource::Upstream { url, .. } => url,
        }
    }

    pub async fn generate(&self) -> Result<DashboardStats, AppError> {
        match self {
            StatsSource::Random => Ok(random_stats()),
            StatsSource::Upstream { client, url } => {
                let res = client
                    .get(url)
                    .timeout(UPSTREAM_TIMEOUT)
                    .send()
                    .await
                    .map_err(|e| AppError::Upstream(format!("Request failed: {e}")))?;

                let res = res
                    .error_for_status()
                    .map_err(|e| AppError::Upstream(format!("Bad status: {e}")))?;

                res.json::<DashboardStats>()
                    .await
                    .map_err(|e| AppError::Upstream(format!("Parse error: {e}")))
            }
        }
    }
}

fn random_stats() -> DashboardStats {
    let mut rng = rand::rng();

    let total_products = rng.random_range(50..500);
    let total_orders = rng.random_range(100..2000);
    let total_inquiries = rng.random_range(20..400);
    let revenue_cents: u64 = rng.random_range(1_000_000..50_000_000);

    DashboardStats {
        total_products,
        active_listings: rng.random_range(total_products / 2..=total_products),
        total_orders,
        pending_orders: rng.random_range(0..=total_orders / 10),
        total_revenue: revenue_cents as f64 / 100.0,
        total_inquiries,
        unread_messages: rng.random_range(0..50),
        active_buyers: rng.random_range(10..300),
        conversion_rate: rng.random_range(100u32..2500) as f64 / 100.0,
        generated_at: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get};

    #[test]
    fn random_stats_are_internally_consistent() {
        for _ in 0..50 {
            let stats = random_stats();
            assert!(stats.active_listings <= stats.total_products);
            assert!(stats.pending_orders <= stats.total_orders);
            assert!(stats.total_revenue > 0.0);
        }
    }

    #[test]
    fn stats_serialize_in_camel_case() {
        let value = serde_json::to_value(random_stats()).unwrap();
        assert!(value.get("totalProducts").is_some());
        assert!(value.get("generatedAt").is_some());
        assert!(value.get("total_products").is_none());
    }

    #[test]
    fn blank_url_falls_back_to_random() {
        assert!(matches!(StatsSource::from_url(None), StatsSource::Random));
        assert!(matches!(
            StatsSource::from_url(Some("  ".into())),
            StatsSource::Random
        ));
    }

    #[tokio::test]
    async fn upstream_stats_are_fetched() {
        let fixed = DashboardStats {
            total_products: 7,
            active_listings: 5,
            total_orders: 3,
            pending_orders: 1,
            total_revenue: 99.5,
            total_inquiries: 2,
            unread_messages: 0,
            active_buyers: 4,
            conversion_rate: 1.25,
            generated_at: "2024-01-01T00:00:00Z".into(),
        };
        let served = fixed.clone();

        let app = Router::new().route("/stats", get(move || async move { Json(served) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let source = StatsSource::from_url(Some(format!("http://{addr}/stats")));
        assert_eq!(source.generate().await.unwrap(), fixed);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_an_upstream_error() {
        // grab a free port, then close it so nothing is listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = StatsSource::from_url(Some(format!("http://{addr}/stats")));
        assert!(matches!(source.generate().await, Err(AppError::Upstream(_))));
    }
}
