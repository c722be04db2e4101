use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub stripe: StripeConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 为空时允许任意来源（仅限本地开发）
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Facility geofence and QR token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    pub facility_lat: f64,
    pub facility_lng: f64,
    pub max_distance_meters: f64,
    pub qr_token_ttl_secs: i64,
    pub qr_signing_secret: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            facility_lat: 0.0,
            facility_lng: 0.0,
            max_distance_meters: 100.0,
            qr_token_ttl_secs: 60,
            qr_signing_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GracePeriodPolicy {
    /// Access continues until end_date after a cancellation request.
    #[default]
    UntilEndDate,
    /// Legacy behaviour: non-managed memberships flip to cancelled right away.
    Immediate,
}

impl std::str::FromStr for GracePeriodPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "until_end_date" => Ok(Self::UntilEndDate),
            "immediate" => Ok(Self::Immediate),
            other => Err(format!("unknown grace period policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndDatePolicy {
    #[default]
    FixedDays,
    MonthlyAnchor,
}

impl std::str::FromStr for EndDatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed_days" => Ok(Self::FixedDays),
            "monthly_anchor" => Ok(Self::MonthlyAnchor),
            other => Err(format!("unknown end date policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct MembershipConfig {
    #[serde(default)]
    pub grace_period_policy: GracePeriodPolicy,
    #[serde(default)]
    pub end_date_policy: EndDatePolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_secs: i64,
    pub max_requests: i32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 20,
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_success_url() -> String {
    "http://localhost:3000/membership/success".to_string()
}

fn default_cancel_url() -> String {
    "http://localhost:3000/membership/cancel".to_string()
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 尝试读取配置文件，如果不存在则完全依赖环境变量
        let mut config: Config = match std::fs::read_to_string(&config_path) {
            Ok(config_str) => Self::parse(&config_str)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fn get_env(name: &str) -> Option<String> {
                    env::var(name).ok()
                }
                fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
                    env::var(name)
                        .ok()
                        .and_then(|v| v.parse::<T>().ok())
                        .unwrap_or(default)
                }

                let database_url = get_env("DATABASE_URL")
                    .ok_or("DATABASE_URL is not set and config.toml was not found")?;

                Config {
                    server: ServerConfig {
                        host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                        port: get_env_parse("SERVER_PORT", 8080u16),
                        allowed_origins: Vec::new(),
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
                        connect_timeout_secs: default_connect_timeout_secs(),
                    },
                    jwt: JwtConfig {
                        secret: get_env("JWT_SECRET")
                            .unwrap_or_else(|| "change-me-in-production".to_string()),
                    },
                    stripe: StripeConfig {
                        secret_key: get_env("STRIPE_SECRET_KEY").unwrap_or_default(),
                        webhook_secret: get_env("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
                        success_url: default_success_url(),
                        cancel_url: default_cancel_url(),
                        currency: default_currency(),
                        request_timeout_secs: default_request_timeout_secs(),
                    },
                    access: AccessConfig::default(),
                    membership: MembershipConfig::default(),
                    rate_limit: RateLimitConfig::default(),
                }
            }
            Err(e) => {
                return Err(format!("failed to read config file {config_path}: {e}").into());
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(config_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        toml::from_str(config_str).map_err(|e| format!("failed to parse config file: {e}").into())
    }

    // 环境变量覆盖（即便文件存在时也覆盖）
    fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT")
            && let Ok(p) = v.parse()
        {
            self.server.port = p;
        }
        if let Ok(v) = env::var("ALLOWED_ORIGINS") {
            self.server.allowed_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            self.database.max_connections = mc;
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Ok(v) = env::var("STRIPE_SECRET_KEY") {
            self.stripe.secret_key = v;
        }
        if let Ok(v) = env::var("STRIPE_WEBHOOK_SECRET") {
            self.stripe.webhook_secret = v;
        }
        if let Ok(v) = env::var("STRIPE_SUCCESS_URL") {
            self.stripe.success_url = v;
        }
        if let Ok(v) = env::var("STRIPE_CANCEL_URL") {
            self.stripe.cancel_url = v;
        }
        if let Ok(v) = env::var("STRIPE_REQUEST_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            self.stripe.request_timeout_secs = n;
        }

        // Access / geofence
        if let Ok(v) = env::var("FACILITY_LAT") {
            self.access.facility_lat = v.parse().map_err(|_| "FACILITY_LAT must be a number")?;
        }
        if let Ok(v) = env::var("FACILITY_LNG") {
            self.access.facility_lng = v.parse().map_err(|_| "FACILITY_LNG must be a number")?;
        }
        if let Ok(v) = env::var("MAX_DISTANCE_METERS") {
            self.access.max_distance_meters = v
                .parse()
                .map_err(|_| "MAX_DISTANCE_METERS must be a number")?;
        }
        if let Ok(v) = env::var("QR_TOKEN_TTL_SECS")
            && let Ok(n) = v.parse()
        {
            self.access.qr_token_ttl_secs = n;
        }
        if let Ok(v) = env::var("QR_SIGNING_SECRET") {
            self.access.qr_signing_secret = v;
        }

        if let Ok(v) = env::var("GRACE_PERIOD_POLICY") {
            self.membership.grace_period_policy = v.parse()?;
        }
        if let Ok(v) = env::var("END_DATE_POLICY") {
            self.membership.end_date_policy = v.parse()?;
        }

        if let Ok(v) = env::var("RATE_LIMIT_WINDOW_SECS")
            && let Ok(n) = v.parse()
        {
            self.rate_limit.window_secs = n;
        }
        if let Ok(v) = env::var("RATE_LIMIT_MAX_REQUESTS")
            && let Ok(n) = v.parse()
        {
            self.rate_limit.max_requests = n;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let access = &self.access;
        if !(-90.0..=90.0).contains(&access.facility_lat)
            || !(-180.0..=180.0).contains(&access.facility_lng)
        {
            return Err("facility coordinate is out of range".into());
        }
        if access.max_distance_meters <= 0.0 {
            return Err("max_distance_meters must be positive".into());
        }
        if access.qr_token_ttl_secs <= 0 {
            return Err("qr_token_ttl_secs must be positive".into());
        }
        if self.rate_limit.window_secs <= 0 || self.rate_limit.max_requests <= 0 {
            return Err("rate limit window and max_requests must be positive".into());
        }
        Ok(())
    }

    /// QR tokens fall back to the JWT secret when no dedicated secret is configured.
    pub fn qr_signing_secret(&self) -> &str {
        if self.access.qr_signing_secret.is_empty() {
            &self.jwt.secret
        } else {
            &self.access.qr_signing_secret
        }
    }
}
