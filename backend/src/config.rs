use anyhow::{anyhow, Result};
use log::{info, warn};
use std::{env, fmt::Display, path::PathBuf, str::FromStr};

/// Process configuration read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    /// Base URL the billing config store calls, including `/api`
    pub api_url: String,
    pub cors_origin: String,
    pub cache_path: PathBuf,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Ok(Self {
            port: try_load("PORTAL_PORT", "9000")?,
            database_url: try_load("DATABASE_URL", "sqlite:portal.db")?,
            api_url: try_load("PORTAL_API_URL", "http://127.0.0.1:9000/api")?,
            cors_origin: try_load("PORTAL_CORS_ORIGIN", "http://localhost:8080")?,
            cache_path: try_load("PORTAL_CACHE_PATH", "portal_cache.yaml")?,
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = match env::var(key) {
        Ok(value) => value,
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default.to_string()
        }
    };

    raw.parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow!("Invalid {key} value {raw:?}: {e}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_load_default_and_invalid() {
        let port: u16 = try_load("PORTAL_TEST_UNSET_PORT", "9000").unwrap();
        assert_eq!(port, 9000);

        env::set_var("PORTAL_TEST_BAD_PORT", "not-a-port");
        assert!(try_load::<u16>("PORTAL_TEST_BAD_PORT", "9000").is_err());
        env::remove_var("PORTAL_TEST_BAD_PORT");
    }
}
