use axum::{Json, extract::State, response::IntoResponse};

use crate::{api::identify::IdentifyState, models::error::ApiResult};

/// Raw dump of every stored contact, for debugging
pub async fn list_contacts(State(state): State<IdentifyState>) -> ApiResult<impl IntoResponse> {
    let contacts = state.engine.list_contacts().await?;
    Ok(Json(contacts))
}
