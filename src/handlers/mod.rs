mod auth;
mod dashboard;
mod health;
mod metrics;

pub use auth::{login_handler, me_handler, register_handler, verify_otp_handler};
pub use dashboard::{X_CACHE, X_CACHE_REMAINING, dashboard_handler};
pub use health::{health_handler, not_found_handler};
pub use metrics::metrics_handler;
