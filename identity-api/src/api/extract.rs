use axum::extract::FromRequest;

use crate::models::error::ApiError;

/// `Json` extractor whose rejections use the API error envelope
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);
