use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

/// Placeholder JWT secrets that must not reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// `None` issues tokens without expiry.
    pub token_ttl: Option<chrono::Duration>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// `None` allows any origin (no credentials cross-site).
    pub cors_origin: Option<String>,
    pub cookie_secure: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("NOTINHAS_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into());
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("NOTINHAS_JWT_SECRET is unset or a placeholder; set a random secret outside development");
        }

        let token_ttl = match get("NOTINHAS_TOKEN_TTL_HOURS") {
            Some(raw) => {
                let hours: i64 = raw
                    .parse()
                    .with_context(|| format!("NOTINHAS_TOKEN_TTL_HOURS is not a number: '{}'", raw))?;
                (hours > 0).then(|| chrono::Duration::hours(hours))
            }
            None => None,
        };

        Ok(Self {
            host: get("NOTINHAS_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: get("NOTINHAS_PORT")
                .unwrap_or_else(|| "4000".into())
                .parse::<u16>()
                .context("NOTINHAS_PORT is not a valid port")?,
            db_path: get("NOTINHAS_DB_PATH")
                .unwrap_or_else(|| "notinhas.db".into())
                .into(),
            jwt_secret,
            token_ttl,
            upload_dir: get("NOTINHAS_UPLOAD_DIR")
                .unwrap_or_else(|| "./uploads".into())
                .into(),
            max_upload_bytes: get("NOTINHAS_MAX_UPLOAD_BYTES")
                .map(|v| v.parse::<usize>())
                .transpose()
                .context("NOTINHAS_MAX_UPLOAD_BYTES is not a number")?
                .unwrap_or(10 * 1024 * 1024),
            cors_origin: get("NOTINHAS_CORS_ORIGIN").filter(|v| !v.is_empty()),
            cookie_secure: get("NOTINHAS_COOKIE_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}
