mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method, header::CONTENT_TYPE};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use notinhas_api::routes::build_router;
use notinhas_api::token::TokenIssuer;
use notinhas_api::uploads::UploadStore;
use notinhas_api::{AppState, AppStateInner};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notinhas=debug,notinhas_api=debug,notinhas_db=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database and upload directory
    let db = notinhas_db::Database::open(&config.db_path)?;
    let uploads = UploadStore::new(config.upload_dir.clone(), config.max_upload_bytes).await?;

    match config.token_ttl {
        Some(ttl) => info!("Session tokens expire after {} hours", ttl.num_hours()),
        None => info!("Session tokens do not expire"),
    }

    let state: AppState = Arc::new(AppStateInner {
        db,
        tokens: TokenIssuer::new(config.jwt_secret.as_bytes(), config.token_ttl),
        uploads,
        cookie_secure: config.cookie_secure,
    });

    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config)?),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Notinhas server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Cookies only cross origins when a concrete origin is allowed with credentials.
fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let Some(origin) = &config.cors_origin else {
        return Ok(CorsLayer::permissive());
    };

    Ok(CorsLayer::new()
        .allow_origin(origin.parse::<HeaderValue>()?)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE]))
}
