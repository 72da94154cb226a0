use axum::{Json, extract::State, response::IntoResponse};
use identity_core::ReconciliationEngine;
use std::sync::Arc;
use tracing::debug;

use crate::api::extract::JsonBody;
use crate::models::{
    contact::{IdentifyRequest, IdentifyResponse},
    error::ApiResult,
};

#[derive(Clone)]
pub struct IdentifyState {
    pub engine: Arc<ReconciliationEngine>,
}

pub async fn identify(
    State(state): State<IdentifyState>,
    JsonBody(request): JsonBody<IdentifyRequest>,
) -> ApiResult<impl IntoResponse> {
    debug!(
        "Identify request: email={:?} phoneNumber={:?}",
        request.email, request.phone_number
    );

    let contact = state
        .engine
        .identify(request.email, request.phone_number)
        .await?;

    Ok(Json(IdentifyResponse { contact }))
}
