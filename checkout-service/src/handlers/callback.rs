use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap},
    response::Redirect,
    Json,
};
use std::collections::HashMap;

use crate::services::callback::{decode_notification, CallbackAck};
use crate::startup::AppState;

pub const STATUS_PAGE: &str = "/status.html";
pub const FAILURE_PAGE: &str = "/failure.html";

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
}

/// Gateway service callback. Always answers 200 with a signed acknowledgement.
pub async fn server_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<CallbackAck> {
    let result = state.callbacks.process(content_type(&headers), &body).await;

    tracing::info!(
        order_reference = %result.ack.order_reference,
        outcome = ?result.outcome,
        "Callback acknowledged"
    );

    Json(result.ack)
}

/// Browser return from the hosted page. A reference in the form/JSON body
/// wins over one in the query string.
pub async fn payment_return(
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Redirect {
    match return_reference(&query, content_type(&headers), &body) {
        Ok(Some(reference)) => {
            tracing::info!(order_reference = %reference, "Customer returned from gateway");
            Redirect::to(&redirect_url(STATUS_PAGE, "order_id", &reference))
        }
        Ok(None) => {
            tracing::warn!("Customer returned without an order reference");
            Redirect::to(&redirect_url(FAILURE_PAGE, "error", "no_order_id_returned"))
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to process payment return");
            Redirect::to(&redirect_url(FAILURE_PAGE, "error", "return_processing_error"))
        }
    }
}

const REFERENCE_KEYS: [&str; 2] = ["orderReference", "order_id"];

fn return_reference(
    query: &HashMap<String, String>,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Option<String>, crate::services::callback::CallbackError> {
    let from_query = REFERENCE_KEYS
        .iter()
        .filter_map(|key| query.get(*key))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string);

    if body.is_empty() {
        return Ok(from_query);
    }

    match decode_notification(content_type, body) {
        Ok(notification) => Ok(REFERENCE_KEYS
            .iter()
            .find_map(|key| notification.get(key))
            .map(|value| value.trim().to_string())
            .or(from_query)),
        // An unreadable body only matters when the query has nothing either.
        Err(e) => match from_query {
            Some(reference) => Ok(Some(reference)),
            None => Err(e),
        },
    }
}

fn redirect_url(page: &str, key: &str, value: &str) -> String {
    let query = serde_urlencoded::to_string([(key, value)]).unwrap_or_default();
    format!("{}?{}", page, query)
}
