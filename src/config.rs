use std::env;
use std::time::Duration;

use tracing::warn;

/// Settings the permission engine itself needs.
#[derive(Debug, Clone)]
pub struct AuthzConfig {
    pub data_scope_enabled: bool,
    pub cache_ttl: Duration,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            data_scope_enabled: true,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub host: String,
    pub port: String,
    pub cors_origins: String,
    pub authz: AuthzConfig,
}

impl AppConfig {
    /// Reads configuration from the process environment. Call `dotenvy::dotenv()` first.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set, using default (not secure for production)");
            "default-secret-change-in-production".to_string()
        });
        let jwt_expiration_hours = env::var("JWT_EXPIRATION_HOURS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(24);
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        let cors_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());

        let defaults = AuthzConfig::default();
        let data_scope_enabled = env::var("DATA_SCOPE_ENABLED")
            .map(|v| parse_flag(&v))
            .unwrap_or(defaults.data_scope_enabled);
        let cache_ttl = env::var("PERMISSION_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache_ttl);

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_expiration_hours,
            host,
            port,
            cors_origins,
            authz: AuthzConfig {
                data_scope_enabled,
                cache_ttl,
            },
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::parse_flag;

    #[test]
    fn flag_parsing_accepts_common_truthy_values() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" ON "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
    }
}
