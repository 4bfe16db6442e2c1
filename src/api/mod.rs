// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum::{
    extract::Path,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use utoipa::OpenApi;

use crate::auth::auth_middleware;
use crate::events::{
    DataEvent, DeployServiceEvent, ErrorEvent, ErrorInfo, Event, ExecuteServiceEvent, PolledEvents,
};
use crate::state::AppState;

pub mod event;
pub mod health;
pub mod service;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        // Asynchronous service operations
        .route("/service/deploy", post(service::deploy_service))
        .route("/service/execute", post(service::execute_service))
        .route("/service/poll", post(service::poll_service))
        // Synchronous service lookups
        .route("/service/code", post(service::get_code))
        .route("/service/public-key", post(service::get_public_key))
        // Subscription lifecycle
        .route("/event/subscribe", post(event::subscribe))
        .route("/event/poll", post(event::poll_event))
        .route("/event/unsubscribe", post(event::unsubscribe))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state.clone());

    Router::new()
        // Health endpoints (no auth required)
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        // API v1 routes
        .nest("/v1", v1_routes)
        // Swagger/OpenAPI docs
        .route("/api-doc/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui_index))
        .route("/docs/", get(swagger_ui_index))
        .route("/docs/{*rest}", get(swagger_ui_asset))
        .layer(build_cors_layer())
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn swagger_ui_index() -> Response {
    serve_swagger_ui("index.html")
}

async fn swagger_ui_asset(Path(rest): Path<String>) -> Response {
    serve_swagger_ui(&rest)
}

fn serve_swagger_ui(path: &str) -> Response {
    let config = Arc::new(utoipa_swagger_ui::Config::from("/api-doc/openapi.json"));
    let asset_path = if path.is_empty() || path == "/" {
        "index.html"
    } else {
        path
    };

    match utoipa_swagger_ui::serve(asset_path, config) {
        Ok(Some(file)) => {
            let content_type = file.content_type;
            let body = file.bytes.into_owned();

            // Make relative asset links resolve correctly for both /docs and /docs/.
            if asset_path == "index.html" {
                match String::from_utf8(body) {
                    Ok(html) => {
                        let html = if html.contains("<base href=\"/docs/\"") {
                            html
                        } else {
                            html.replacen("<head>", "<head>\n    <base href=\"/docs/\" />", 1)
                        };
                        return (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], html)
                            .into_response();
                    }
                    Err(error) => {
                        return (
                            StatusCode::OK,
                            [(header::CONTENT_TYPE, content_type)],
                            error.into_bytes(),
                        )
                            .into_response();
                    }
                }
            }

            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response(),
    }
}

/// Build CORS layer from environment configuration.
///
/// - If `CORS_ALLOWED_ORIGINS` is set, only those origins are allowed.
///   Multiple origins can be comma-separated.
/// - If not set, falls back to permissive CORS (development only).
fn build_cors_layer() -> CorsLayer {
    if let Ok(origins) = std::env::var("CORS_ALLOWED_ORIGINS") {
        let allowed: Vec<_> = origins
            .split(',')
            .map(|s| s.trim().parse().expect("Invalid CORS origin"))
            .collect();
        tracing::info!(origins = %origins, "CORS: restricting to configured origins");
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    } else {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set - using permissive CORS (development only)");
        CorsLayer::permissive()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Service endpoints
        service::deploy_service,
        service::execute_service,
        service::poll_service,
        service::get_code,
        service::get_public_key,
        // Event endpoints
        event::subscribe,
        event::poll_event,
        event::unsubscribe,
        // Health endpoints
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            // Service schemas
            service::DeployServiceBody,
            service::ExecuteServiceBody,
            service::AsyncResponse,
            service::PollServiceBody,
            service::GetCodeBody,
            service::GetCodeResponseBody,
            service::GetPublicKeyBody,
            service::GetPublicKeyResponseBody,
            // Event schemas
            event::SubscribeBody,
            event::PollEventBody,
            event::UnsubscribeBody,
            event::UnsubscribeResponse,
            // Polled event schemas
            PolledEvents,
            Event,
            DeployServiceEvent,
            ExecuteServiceEvent,
            ErrorEvent,
            ErrorInfo,
            DataEvent,
            // Health schemas
            health::HealthResponse,
            health::HealthChecks,
            health::ReadyResponse
        )
    ),
    tags(
        (name = "Service", description = "Asynchronous service deployment and execution"),
        (name = "Event", description = "Subscriptions on backend events"),
        (name = "Health", description = "Liveness and readiness checks")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

/// Security scheme for OpenAPI documentation
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
            components.add_security_scheme(
                "id_token",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-ID-TOKEN"))),
            );
        }
    }
}
