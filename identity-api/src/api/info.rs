use axum::Json;

use crate::models::contact::ServiceInfo;

pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: "Identity reconciliation API running. POST /identify to link a contact.",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn health_check() -> &'static str {
    "OK"
}
