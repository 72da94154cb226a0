use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use identity_core::{EngineConfig, ReconciliationEngine};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod core;
mod middleware;
mod models;

use crate::api::identify::IdentifyState;
use crate::core::config::{LogFormat, LoggingConfig, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let settings = Settings::new()?;
    init_tracing(&settings.logging);

    info!(
        "Starting identity reconciliation API on {}:{}",
        settings.server.host, settings.server.port
    );

    let repository = core::storage::connect(&settings.storage).await?;
    let engine = Arc::new(ReconciliationEngine::new(
        repository,
        EngineConfig {
            secondary_fields: settings.reconcile.secondary_fields,
        },
    ));

    let app = create_app(engine);

    let listener =
        tokio::net::TcpListener::bind((settings.server.host.as_str(), settings.server.port))
            .await?;

    info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

fn create_app(engine: Arc<ReconciliationEngine>) -> Router {
    use crate::middleware::{error_handler, request_id};

    let identify_state = IdentifyState { engine };

    let identity_routes = Router::new()
        .route("/identify", post(api::identify::identify))
        .route("/contacts", get(api::contacts::list_contacts))
        .with_state(identify_state);

    Router::new()
        .route("/", get(api::info::root))
        .route("/health", get(api::info::health_check))
        .merge(identity_routes)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(request_id::add_request_id))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(error_handler::log_failures))
                .layer(CorsLayer::permissive()),
        )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use identity_core::{
        ContactRepository, ContactTransaction, InMemoryContactRepository, LinkPrecedence,
        NewContact,
    };
    use serde_json::{Value, json};

    fn server() -> (TestServer, InMemoryContactRepository) {
        let repository = InMemoryContactRepository::new();
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::new(repository.clone()),
            EngineConfig::default(),
        ));
        (TestServer::new(create_app(engine)).unwrap(), repository)
    }

    #[tokio::test]
    async fn test_identify_creates_primary() {
        let (server, _) = server();

        let response = server
            .post("/identify")
            .json(&json!({ "email": "lorraine@hillvalley.edu", "phoneNumber": "123456" }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["contact"]["emails"], json!(["lorraine@hillvalley.edu"]));
        assert_eq!(body["contact"]["phoneNumbers"], json!(["123456"]));
        assert_eq!(body["contact"]["secondaryContactIds"], json!([]));
        assert!(body["contact"]["primaryContactId"].is_i64());
    }

    #[tokio::test]
    async fn test_identify_links_numeric_phone() {
        let (server, _) = server();

        server
            .post("/identify")
            .json(&json!({ "email": "lorraine@hillvalley.edu", "phoneNumber": "123456" }))
            .await
            .assert_status_ok();

        let response = server
            .post("/identify")
            .json(&json!({ "email": "mcfly@hillvalley.edu", "phoneNumber": 123456 }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(
            body["contact"]["emails"],
            json!(["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"])
        );
        assert_eq!(body["contact"]["phoneNumbers"], json!(["123456"]));
        assert_eq!(
            body["contact"]["secondaryContactIds"]
                .as_array()
                .map(Vec::len),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_identify_without_identifiers_is_bad_request() {
        let (server, repository) = server();

        let response = server
            .post("/identify")
            .json(&json!({ "email": null, "phoneNumber": null }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert!(repository.is_empty());
    }

    #[tokio::test]
    async fn test_identify_unparseable_body_uses_error_envelope() {
        let (server, repository) = server();

        let mistyped = server
            .post("/identify")
            .json(&json!({ "email": 5 }))
            .await;
        mistyped.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = mistyped.json();
        assert_eq!(body["error"]["type"], "invalid_request_error");

        let fractional = server
            .post("/identify")
            .json(&json!({ "phoneNumber": 1e3 }))
            .await;
        fractional.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = fractional.json();
        assert_eq!(body["error"]["type"], "invalid_request_error");

        let malformed = server
            .post("/identify")
            .content_type("application/json")
            .text("{not json")
            .await;
        malformed.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = malformed.json();
        assert_eq!(body["error"]["type"], "invalid_request_error");

        assert!(repository.is_empty());
    }

    #[tokio::test]
    async fn test_identify_inconsistent_cluster_is_internal_error() {
        let (server, repository) = server();

        let mut tx = repository.begin().await.unwrap();
        let primary = tx
            .insert(NewContact::primary(Some("doc@hillvalley.edu".to_string()), None))
            .await
            .unwrap();
        tx.insert(NewContact {
            email: None,
            phone_number: Some("555".to_string()),
            linked_id: Some(primary.id),
            link_precedence: LinkPrecedence::Primary,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let response = server
            .post("/identify")
            .json(&json!({ "email": "doc@hillvalley.edu", "phoneNumber": "555" }))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["error"]["type"], "internal_error");
        assert_eq!(body["error"]["code"], "inconsistent_cluster");
        assert_eq!(repository.len(), 2);
    }

    #[tokio::test]
    async fn test_identify_store_offline_is_unavailable() {
        let (server, repository) = server();
        repository.set_available(false);

        let response = server
            .post("/identify")
            .json(&json!({ "email": "doc@hillvalley.edu" }))
            .await;

        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = response.json();
        assert_eq!(body["error"]["type"], "service_unavailable");
    }

    #[tokio::test]
    async fn test_contacts_lists_merged_records() {
        let (server, _) = server();

        for body in [
            json!({ "email": "george@hillvalley.edu", "phoneNumber": "919191" }),
            json!({ "email": "biffsucks@hillvalley.edu", "phoneNumber": "717171" }),
            json!({ "email": "george@hillvalley.edu", "phoneNumber": "717171" }),
        ] {
            server.post("/identify").json(&body).await.assert_status_ok();
        }

        let response = server.get("/contacts").await;
        response.assert_status_ok();

        let contacts: Value = response.json();
        let contacts = contacts.as_array().unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0]["linkPrecedence"], "primary");
        assert_eq!(contacts[0]["linkedId"], Value::Null);
        assert_eq!(contacts[1]["linkPrecedence"], "secondary");
        assert_eq!(contacts[1]["linkedId"], contacts[0]["id"]);
        assert!(contacts[1].get("updatedAt").is_some());
        assert_eq!(contacts[1]["deletedAt"], Value::Null);
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let (server, _) = server();

        let root = server.get("/").await;
        root.assert_status_ok();
        let body: Value = root.json();
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

        server.get("/health").await.assert_text("OK");
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let (server, _) = server();

        let response = server
            .get("/health")
            .add_header(
                axum::http::HeaderName::from_static("x-request-id"),
                axum::http::HeaderValue::from_static("req-42"),
            )
            .await;

        assert_eq!(response.header("x-request-id"), "req-42");

        let generated = server.get("/health").await;
        assert!(!generated.header("x-request-id").is_empty());
    }
}
