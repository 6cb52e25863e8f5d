use clap::{Parser, ValueEnum};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_CACHE_TTL: u64 = 300;
pub const DEFAULT_GLOBAL_LIMIT: u32 = 100;
pub const DEFAULT_DASHBOARD_LIMIT: u32 = 20;
pub const DEFAULT_RATE_WINDOW: u64 = 60;
pub const DEFAULT_OTP_TTL: u64 = 600;
pub const DEFAULT_DEMO_EMAIL: &str = "user@example.com";
pub const DEFAULT_DEMO_PASSWORD: &str = "password123";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "marketplace-gateway")]
#[command(about = "Dashboard and auth API for the marketplace frontend")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    // Only origin allowed by CORS
    #[arg(long, env = "CORS_ORIGIN", default_value = DEFAULT_CORS_ORIGIN)]
    pub cors_origin: String,

    // Dashboard cache TTL in seconds
    #[arg(short, long, env = "CACHE_TTL", default_value_t = DEFAULT_CACHE_TTL)]
    pub cache_ttl: u64,

    // Max requests per IP per window, all routes (0 disables)
    #[arg(long, env = "GLOBAL_RATE_LIMIT", default_value_t = DEFAULT_GLOBAL_LIMIT)]
    pub global_limit: u32,

    // Max dashboard regenerations per IP per window (0 disables)
    #[arg(long, env = "DASHBOARD_RATE_LIMIT", default_value_t = DEFAULT_DASHBOARD_LIMIT)]
    pub dashboard_limit: u32,

    // Rate limit window in seconds (at least 1)
    #[arg(
        long,
        env = "RATE_WINDOW",
        default_value_t = DEFAULT_RATE_WINDOW,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub rate_window: u64,

    // How long a registration OTP stays valid, in seconds
    #[arg(long, env = "OTP_TTL", default_value_t = DEFAULT_OTP_TTL)]
    pub otp_ttl: u64,

    // Aggregation service returning dashboard stats as JSON.
    // Random placeholder stats are generated when unset.
    #[arg(long, env = "STATS_URL")]
    pub stats_url: Option<String>,

    #[arg(long, env = "DEMO_EMAIL", default_value = DEFAULT_DEMO_EMAIL)]
    pub demo_email: String,

    #[arg(long, env = "DEMO_PASSWORD", default_value = DEFAULT_DEMO_PASSWORD)]
    pub demo_password: String,

    #[arg(long, env = "APP_ENV", value_enum, default_value_t = Environment::Development)]
    pub environment: Environment,

    // Bind attempts after the first failure before giving up
    #[arg(long, default_value_t = 3)]
    pub bind_retries: u32,

    // Seconds between bind attempts
    #[arg(long, default_value_t = 2)]
    pub bind_retry_delay: u64,
}

impl Args {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }

    pub fn otp_ttl(&self) -> Duration {
        Duration::from_secs(self.otp_ttl)
    }
}

impl Default for Args {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
            global_limit: DEFAULT_GLOBAL_LIMIT,
            dashboard_limit: DEFAULT_DASHBOARD_LIMIT,
            rate_window: DEFAULT_RATE_WINDOW,
            otp_ttl: DEFAULT_OTP_TTL,
            stats_url: None,
            demo_email: DEFAULT_DEMO_EMAIL.to_string(),
            demo_password: DEFAULT_DEMO_PASSWORD.to_string(),
            environment: Environment::Development,
            bind_retries: 3,
            bind_retry_delay: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "marketplace-gateway",
            "--port",
            "8081",
            "--dashboard-limit",
            "5",
            "--environment",
            "production",
            "--stats-url",
            "http://stats.internal/api",
        ]);

        assert_eq!(args.port, 8081);
        assert_eq!(args.dashboard_limit, 5);
        assert_eq!(args.environment, Environment::Production);
        assert_eq!(args.stats_url.as_deref(), Some("http://stats.internal/api"));
    }

    #[test]
    fn zero_rate_window_is_rejected() {
        let parsed = Args::try_parse_from(["marketplace-gateway", "--rate-window", "0"]);
        assert!(parsed.is_err());

        let args = Args::try_parse_from(["marketplace-gateway", "--rate-window", "1"]).unwrap();
        assert_eq!(args.rate_window(), Duration::from_secs(1));
    }

    #[test]
    fn durations_are_seconds() {
        let args = Args::default();
        assert_eq!(args.cache_ttl(), Duration::from_secs(300));
        assert_eq!(args.rate_window(), Duration::from_secs(60));
        assert!(args.environment.is_development());
    }
}
