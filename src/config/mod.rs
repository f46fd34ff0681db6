//! Configuration management for Rollcall Core

use crate::domain::{AlertSeverity, SecurityEventType};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// JWT configuration
    pub jwt: JwtConfig,
    /// Revocation registry configuration
    pub revocation: RevocationConfig,
    /// Security monitor configuration
    pub security: SecurityMonitorConfig,
    /// Logging / metrics configuration
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Clone)]
pub struct JwtConfig {
    /// HMAC secret for the active key version
    pub secret: String,
    /// Version of the active signing key, written to the `kid` header
    pub key_version: String,
    /// Older HMAC secrets still accepted for verification, keyed by version
    pub previous_secrets: HashMap<String, String>,
    pub issuer: String,
    pub audience: String,
    pub token_ttl_secs: i64,
    /// Clock skew tolerated when checking `exp`
    pub leeway_secs: i64,
    pub private_key_pem: Option<String>,
    pub public_key_pem: Option<String>,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("key_version", &self.key_version)
            .field(
                "previous_versions",
                &self.previous_secrets.keys().collect::<Vec<_>>(),
            )
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .field("rsa", &self.private_key_pem.is_some())
            .finish()
    }
}

impl JwtConfig {
    /// Longest span over which a freshly issued token still verifies
    pub fn max_token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs.saturating_add(self.leeway_secs.max(0)))
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            key_version: "v1".to_string(),
            previous_secrets: HashMap::new(),
            issuer: "rollcall".to_string(),
            audience: "rollcall-clients".to_string(),
            token_ttl_secs: 86400,
            leeway_secs: 0,
            private_key_pem: None,
            public_key_pem: None,
        }
    }
}

/// Where revocation entries are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationBackend {
    Mysql,
    Redis,
}

impl std::str::FromStr for RevocationBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" => Ok(RevocationBackend::Mysql),
            "redis" => Ok(RevocationBackend::Redis),
            _ => Err(format!("Unknown revocation backend: {}", s)),
        }
    }
}

/// What `is_revoked` answers when the store cannot be consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationFailurePolicy {
    /// Treat the credential as not revoked and log the fault
    FailOpen,
    /// Treat the credential as revoked
    FailClosed,
}

impl std::str::FromStr for RevocationFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fail_open" | "open" => Ok(RevocationFailurePolicy::FailOpen),
            "fail_closed" | "closed" => Ok(RevocationFailurePolicy::FailClosed),
            _ => Err(format!("Unknown revocation failure policy: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RevocationConfig {
    pub backend: RevocationBackend,
    pub store_timeout_ms: u64,
    pub sweep_interval_secs: u64,
    /// Lifetime of an entry when the caller does not supply one
    pub default_ttl_secs: i64,
    pub failure_policy: RevocationFailurePolicy,
}

impl RevocationConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            backend: RevocationBackend::Mysql,
            store_timeout_ms: 500,
            sweep_interval_secs: 300,
            default_ttl_secs: 86400,
            failure_policy: RevocationFailurePolicy::FailOpen,
        }
    }
}

/// Alert threshold for one event type
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct AlertThreshold {
    pub count: i64,
    pub window_mins: i64,
    pub severity: AlertSeverity,
}

impl AlertThreshold {
    pub fn new(count: i64, window_mins: i64, severity: AlertSeverity) -> Self {
        Self {
            count,
            window_mins,
            severity,
        }
    }
}

/// Configuration for security event scoring and alerting
#[derive(Debug, Clone)]
pub struct SecurityMonitorConfig {
    /// Trailing window used for the per-source frequency adjustment
    pub frequency_window_mins: i64,
    pub thresholds: HashMap<SecurityEventType, AlertThreshold>,
}

impl Default for SecurityMonitorConfig {
    fn default() -> Self {
        use AlertSeverity::*;
        use SecurityEventType::*;

        let thresholds = HashMap::from([
            (LoginFailed, AlertThreshold::new(5, 15, High)),
            (InvalidToken, AlertThreshold::new(10, 5, Medium)),
            (RevokedTokenUse, AlertThreshold::new(3, 15, High)),
            (UnauthorizedAccess, AlertThreshold::new(5, 10, Medium)),
            (PrivilegeEscalation, AlertThreshold::new(3, 60, High)),
            (CrossTenantAccess, AlertThreshold::new(1, 60, Critical)),
            (SuspiciousActivity, AlertThreshold::new(1, 15, Critical)),
        ]);

        Self {
            frequency_window_mins: 15,
            thresholds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
    /// Address for the Prometheus scrape listener (e.g. 0.0.0.0:9100)
    pub metrics_addr: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            jwt: jwt_from_env()?,
            revocation: RevocationConfig {
                backend: env::var("REVOCATION_BACKEND")
                    .unwrap_or_else(|_| "mysql".to_string())
                    .parse()
                    .map_err(anyhow::Error::msg)?,
                store_timeout_ms: env::var("REVOCATION_STORE_TIMEOUT_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .context("Invalid REVOCATION_STORE_TIMEOUT_MS")?,
                sweep_interval_secs: env::var("REVOCATION_SWEEP_INTERVAL_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .context("Invalid REVOCATION_SWEEP_INTERVAL_SECS")?,
                default_ttl_secs: env::var("REVOCATION_DEFAULT_TTL_SECS")
                    .unwrap_or_else(|_| "86400".to_string())
                    .parse()
                    .unwrap_or(86400),
                failure_policy: env::var("REVOCATION_FAILURE_POLICY")
                    .unwrap_or_else(|_| "fail_open".to_string())
                    .parse()
                    .map_err(anyhow::Error::msg)?,
            },
            security: security_from_env()?,
            telemetry: TelemetryConfig {
                log_format: match env::var("LOG_FORMAT").as_deref() {
                    Ok("json") => LogFormat::Json,
                    _ => LogFormat::Pretty,
                },
                metrics_addr: env::var("METRICS_ADDR").ok(),
            },
        })
    }
}

fn jwt_from_env() -> Result<JwtConfig> {
    let previous_secrets: HashMap<String, String> = match env::var("JWT_PREVIOUS_SECRETS") {
        Ok(raw) => serde_json::from_str(&raw).context("JWT_PREVIOUS_SECRETS must be a JSON object")?,
        Err(_) => HashMap::new(),
    };

    let config = JwtConfig {
        secret: env::var("JWT_SECRET").context("JWT_SECRET is required")?,
        key_version: env::var("JWT_KEY_VERSION").unwrap_or_else(|_| "v1".to_string()),
        previous_secrets,
        issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "rollcall".to_string()),
        audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| "rollcall-clients".to_string()),
        token_ttl_secs: env::var("JWT_TOKEN_TTL_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()
            .unwrap_or(86400),
        leeway_secs: env::var("JWT_LEEWAY_SECS")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .unwrap_or(0),
        private_key_pem: env::var("JWT_PRIVATE_KEY")
            .ok()
            .map(|value| value.replace("\\n", "\n")),
        public_key_pem: env::var("JWT_PUBLIC_KEY")
            .ok()
            .map(|value| value.replace("\\n", "\n")),
    };

    if config.previous_secrets.contains_key(&config.key_version) {
        bail!(
            "JWT_PREVIOUS_SECRETS must not contain the active key version {}",
            config.key_version
        );
    }

    Ok(config)
}

fn security_from_env() -> Result<SecurityMonitorConfig> {
    let mut config = SecurityMonitorConfig::default();

    if let Ok(mins) = env::var("SECURITY_FREQUENCY_WINDOW_MINS") {
        config.frequency_window_mins = mins
            .parse()
            .context("Invalid SECURITY_FREQUENCY_WINDOW_MINS")?;
    }

    // Per-type overrides, e.g. {"login_failed": {"count": 3, "window_mins": 5, "severity": "high"}}
    if let Ok(raw) = env::var("SECURITY_ALERT_THRESHOLDS") {
        let overrides: HashMap<SecurityEventType, AlertThreshold> =
            serde_json::from_str(&raw).context("SECURITY_ALERT_THRESHOLDS must be a JSON object")?;
        config.thresholds.extend(overrides);
    }

    Ok(config)
}
