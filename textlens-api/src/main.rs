//! TEXTLENS API Server Entry Point
//!
//! Reads configuration from the environment, builds the stores, cache and
//! models it names, and serves the Axum router until ctrl-c.

use std::net::SocketAddr;

use textlens_api::telemetry::{init_tracing, TelemetryConfig};
use textlens_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState, AuthConfig, ServiceConfig};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let api_config = ApiConfig::from_env().map_err(|e| ApiError::internal_error(e.to_string()))?;
    let service_config =
        ServiceConfig::from_env().map_err(|e| ApiError::internal_error(e.to_string()))?;
    let auth_config = AuthConfig::from_env();
    auth_config
        .validate_for_environment(&service_config.environment)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    let state = AppState::from_config(&api_config, &service_config).await?;
    let app = create_api_router(state, &api_config, auth_config);

    let addr = api_config.bind_addr()?;
    tracing::info!(%addr, "Starting TEXTLENS API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
