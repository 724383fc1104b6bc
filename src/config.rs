//! Service configuration from the environment.

use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::info;

use crate::session::DEFAULT_SESSION_TTL;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub media_root: PathBuf,
    /// Idle seconds before a session is dropped.
    pub session_ttl_secs: u64,
    pub catalog: CatalogSettings,
}

/// Listing sizes for the storefront endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatalogSettings {
    pub page_size: u32,
    pub popular_limit: i64,
    pub limited_limit: i64,
    pub limited_stock_threshold: i32,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self { page_size: 20, popular_limit: 8, limited_limit: 16, limited_stock_threshold: 5 }
    }
}

#[derive(Debug, Error)]
#[error("invalid value '{value}' for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = CatalogSettings::default();
        Ok(Self {
            port: try_load("PORT", 8083)?,
            database_url: optional("DATABASE_URL"),
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", 10)?,
            nats_url: optional("NATS_URL"),
            media_root: try_load("MEDIA_ROOT", PathBuf::from("./media"))?,
            session_ttl_secs: try_load("SESSION_TTL_SECS", DEFAULT_SESSION_TTL.as_secs())?,
            catalog: CatalogSettings {
                page_size: try_load("CATALOG_PAGE_SIZE", defaults.page_size)?,
                popular_limit: try_load("POPULAR_LIMIT", defaults.popular_limit)?,
                limited_limit: try_load("LIMITED_LIMIT", defaults.limited_limit)?,
                limited_stock_threshold: try_load("LIMITED_STOCK_THRESHOLD", defaults.limited_stock_threshold)?,
            },
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + std::fmt::Debug,
    T::Err: Display,
{
    match optional(key) {
        None => {
            info!("{key} not set, using default: {default:?}");
            Ok(default)
        }
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError { key, value: raw.clone(), reason: e.to_string() }),
    }
}
