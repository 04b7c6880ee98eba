//! Proxy callback receptor.
//!
//! The CAS server calls the `pgtUrl` with `pgtIou` and `pgtId` before it
//! answers the validation request; the pair is stored for the validator to
//! correlate. Parameters arrive in the query string of a GET, or as a
//! form-encoded POST body from servers configured to post the callback.

use std::sync::Arc;

use axum::{
    extract::{Form, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use log::{debug, info};
use serde::Deserialize;

use crate::validation::pgt_store::ProxyGrantingTicketStorage;

/// Acknowledgement body the CAS server expects from the callback.
pub const PROXY_SUCCESS_RESPONSE: &str = "<?xml version=\"1.0\"?>\n<casClient:proxySuccess xmlns:casClient=\"http://www.yale.edu/tp/casClient\" />";

/// Parameters of a callback delivery.
#[derive(Debug, Default, Deserialize)]
pub struct ProxyCallbackParams {
    /// IOU the validation response will reference.
    #[serde(rename = "pgtIou")]
    pub pgt_iou: Option<String>,
    /// The proxy-granting ticket itself.
    #[serde(rename = "pgtId")]
    pub pgt_id: Option<String>,
}

/// Store the pair if both halves are present and return the response body.
///
/// Missing or blank parameters yield an empty body; CAS servers check the
/// callback URL that way before delivering tickets.
pub async fn receive_proxy_granting_ticket(
    storage: &dyn ProxyGrantingTicketStorage,
    pgt_iou: Option<&str>,
    pgt_id: Option<&str>,
) -> String {
    let pair = pgt_iou
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .zip(pgt_id.map(str::trim).filter(|v| !v.is_empty()));

    match pair {
        Some((iou, pgt)) => {
            storage.save(iou, pgt).await;
            info!("Received proxy-granting ticket for IOU {}", iou);
            PROXY_SUCCESS_RESPONSE.to_string()
        }
        None => {
            debug!("Proxy callback without pgtIou/pgtId");
            String::new()
        }
    }
}

async fn respond(storage: &dyn ProxyGrantingTicketStorage, params: ProxyCallbackParams) -> Response {
    let body = receive_proxy_granting_ticket(
        storage,
        params.pgt_iou.as_deref(),
        params.pgt_id.as_deref(),
    )
    .await;
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

/// GET handler for the callback route.
pub async fn proxy_callback(
    State(storage): State<Arc<dyn ProxyGrantingTicketStorage>>,
    Query(params): Query<ProxyCallbackParams>,
) -> Response {
    respond(storage.as_ref(), params).await
}

/// POST handler for the callback route, reading a form-encoded body.
pub async fn proxy_callback_form(
    State(storage): State<Arc<dyn ProxyGrantingTicketStorage>>,
    Form(params): Form<ProxyCallbackParams>,
) -> Response {
    respond(storage.as_ref(), params).await
}

/// Router serving the callback at `path` for GET and form POST.
pub fn proxy_callback_router(storage: Arc<dyn ProxyGrantingTicketStorage>, path: &str) -> Router {
    Router::new()
        .route(path, get(proxy_callback).post(proxy_callback_form))
        .with_state(storage)
}
