//! HTTP gateway in front of a CAS server.
//!
//! Serves `GET /validate?ticket=..&service=..` returning the validated
//! assertion as JSON, and the proxy callback receptor the CAS server
//! delivers proxy-granting tickets to.

use std::env;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cas_client::validation::{
    proxy_callback_router, spawn_cleaner, CasTicketValidator, InMemoryProxyGrantingTicketStorage,
    ProxyGrantingTicketStorage, ReqwestTransport, TicketValidator, ValidationError,
    ValidatorConfig,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct GatewaySettings {
    port: u16,
    receptor_path: String,
    cleanup_interval: Duration,
}

fn load_settings() -> Result<GatewaySettings, Box<dyn Error>> {
    Ok(GatewaySettings {
        port: env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()?,
        receptor_path: env::var("CAS_PROXY_RECEPTOR_PATH")
            .unwrap_or_else(|_| "/proxyCallback".to_string()),
        cleanup_interval: Duration::from_secs(
            env::var("CAS_PGT_CLEANUP_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
        ),
    })
}

#[derive(Debug, Deserialize)]
struct ValidateQuery {
    ticket: Option<String>,
    service: Option<String>,
}

/// Error body returned by `/validate`.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl ErrorResponse {
    fn from_validation(e: &ValidationError) -> Self {
        let error = match e {
            ValidationError::InvalidArgument(_) => "invalid_request",
            ValidationError::Transport(_) | ValidationError::ProtocolViolation(_) => "cas_unavailable",
            _ => "authentication_failed",
        };
        Self {
            error: error.to_string(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.error.as_str() {
            "invalid_request" => StatusCode::BAD_REQUEST,
            "authentication_failed" => StatusCode::UNAUTHORIZED,
            "cas_unavailable" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

async fn validate_handler(
    State(validator): State<Arc<dyn TicketValidator>>,
    Query(query): Query<ValidateQuery>,
) -> Response {
    let ticket = query.ticket.unwrap_or_default();
    let service = query.service.unwrap_or_default();

    match validator.validate(&ticket, &service).await {
        Ok(assertion) => Json(assertion).into_response(),
        Err(e) => {
            match &e {
                ValidationError::Transport(_) | ValidationError::ProtocolViolation(_) => {
                    error!("Validation against CAS failed: {}", e)
                }
                _ => warn!("Validation denied: {}", e),
            }
            ErrorResponse::from_validation(&e).into_response()
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let settings = load_settings()?;
    let config = ValidatorConfig::from_env()?;

    let transport = Arc::new(ReqwestTransport::new(config.timeout)?);
    let storage: Arc<dyn ProxyGrantingTicketStorage> =
        Arc::new(InMemoryProxyGrantingTicketStorage::new(config.pgt_retention));
    let cleaner = spawn_cleaner(storage.clone(), settings.cleanup_interval);

    let validator: Arc<dyn TicketValidator> =
        Arc::new(CasTicketValidator::new(config, transport)?.with_storage(storage.clone()));

    let app = Router::new()
        .route("/validate", get(validate_handler))
        .with_state(validator)
        .merge(proxy_callback_router(storage, &settings.receptor_path));

    let listener = TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?;
    info!(
        "Listening on: 0.0.0.0:{} (proxy receptor at {})",
        settings.port, settings.receptor_path
    );

    axum::serve(listener, app).await?;
    cleaner.abort();

    Ok(())
}
