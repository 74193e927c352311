use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: i64 = 30;
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 14;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| data_dir.join("oasis.db").to_string_lossy().into_owned());
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let jwt_secret =
            env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".to_string());
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "oasis-backend".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "oasis-desktop".to_string());
        let access_token_ttl_minutes = env::var("ACCESS_TOKEN_TTL_MINUTES")
            .unwrap_or_else(|_| DEFAULT_ACCESS_TOKEN_TTL_MINUTES.to_string())
            .parse()
            .context("ACCESS_TOKEN_TTL_MINUTES must be an integer")?;
        let refresh_token_ttl_days = env::var("REFRESH_TOKEN_TTL_DAYS")
            .unwrap_or_else(|_| DEFAULT_REFRESH_TOKEN_TTL_DAYS.to_string())
            .parse()
            .context("REFRESH_TOKEN_TTL_DAYS must be an integer")?;

        Ok(Self {
            database_url,
            database_max_pool_size,
            data_dir,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            access_token_ttl_minutes,
            refresh_token_ttl_days,
        })
    }

    /// Configuration rooted at an explicit data directory, with defaults for
    /// everything else. Used by tests and embedded setups.
    pub fn for_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            database_url: data_dir.join("oasis.db").to_string_lossy().into_owned(),
            database_max_pool_size: DEFAULT_MAX_POOL_SIZE,
            data_dir,
            jwt_secret: "dev-secret-change-me".to_string(),
            jwt_issuer: "oasis-backend".to_string(),
            jwt_audience: "oasis-desktop".to_string(),
            access_token_ttl_minutes: DEFAULT_ACCESS_TOKEN_TTL_MINUTES,
            refresh_token_ttl_days: DEFAULT_REFRESH_TOKEN_TTL_DAYS,
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }
}
