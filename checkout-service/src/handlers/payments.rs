use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use service_core::error::AppError;

use crate::dtos::{
    CreatePaymentRequest, PaymentRedirectResponse, PaymentStatusQuery, PaymentStatusResponse,
};
use crate::startup::AppState;
use crate::utils::validation::ValidatedBody;

/// Create a pending order and return the signed hosted-page payload.
/// Accepts a JSON body or a urlencoded form post.
pub async fn create_payment(
    State(state): State<AppState>,
    ValidatedBody(request): ValidatedBody<CreatePaymentRequest>,
) -> Result<Json<PaymentRedirectResponse>, AppError> {
    let product = request
        .product()
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Unknown product")))?;

    let payload = state
        .payments
        .create(&request.name, &request.email, product)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create payment request");
            AppError::InternalError(anyhow::anyhow!("Failed to create payment"))
        })?;

    Ok(Json(PaymentRedirectResponse {
        gateway_url: state.gateway_url.clone(),
        payload,
    }))
}

/// Public status of an order, polled by the status page.
pub async fn payment_status(
    State(state): State<AppState>,
    Query(query): Query<PaymentStatusQuery>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let order_id = query
        .order_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("order_id is required")))?;

    let order = state
        .store
        .get(order_id.trim())
        .await
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order not found")))?;

    Ok(Json(PaymentStatusResponse {
        status: order.status.public_status().to_string(),
        order_id: order.reference,
        product_description: order.product_description,
        timestamp: Utc::now(),
    }))
}
