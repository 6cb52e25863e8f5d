use std::sync::Arc;

use crate::auth::AuthStore;
use crate::cache::ResponseCache;
use crate::config::Args;
use crate::rate_limit::RateLimiter;
use crate::stats::StatsSource;

// app's shared state, built once and handed to the router
pub struct AppState {
    pub config: Args,
    pub cache: ResponseCache,
    pub global_limiter: RateLimiter,
    pub dashboard_limiter: RateLimiter,
    pub auth: AuthStore,
    pub stats: StatsSource,
}

impl AppState {
    pub fn new(config: Args) -> Arc<Self> {
        let auth = AuthStore::new(config.otp_ttl());
        auth.seed_user("Demo User", &config.demo_email, &config.demo_password);

        Arc::new(Self {
            cache: ResponseCache::new(config.cache_ttl()),
            global_limiter: RateLimiter::new("global", config.global_limit, config.rate_window()),
            dashboard_limiter: RateLimiter::new(
                "dashboard",
                config.dashboard_limit,
                config.rate_window(),
            ),
            stats: StatsSource::from_url(config.stats_url.clone()),
            auth,
            config,
        })
    }
}
