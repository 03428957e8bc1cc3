use axum::{extract::State, Json};

use crate::dtos::StatsResponse;
use crate::startup::AppState;

/// Process-lifetime payment counters.
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        counters: state.metrics.snapshot(),
        stored_orders: state.store.len().await,
        notification_channels: state.dispatcher.channels(),
    })
}
