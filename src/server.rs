//! HTTP trigger surface: thin admin endpoints over the pipeline stages.
//!
//! Each endpoint is a synchronous call into the corresponding stage and
//! returns the structured summary rather than raw logs.

use crate::artifacts::{self, Stage};
use crate::pipeline::Pipeline;
use axum::{
    extract::Path,
    http::{Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Extension, Router,
};
use hyper::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "nightspot-scraper",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn error_response(e: crate::error::ScraperError) -> axum::response::Response {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

async fn run_full(Extension(pipeline): Extension<Arc<Pipeline>>) -> impl IntoResponse {
    match pipeline.run_full().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

async fn run_discovery(Extension(pipeline): Extension<Arc<Pipeline>>) -> impl IntoResponse {
    match pipeline.run_discovery().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

async fn run_filters(Extension(pipeline): Extension<Arc<Pipeline>>) -> impl IntoResponse {
    match pipeline.run_filters() {
        Ok(summaries) => Json(summaries).into_response(),
        Err(e) => error_response(e),
    }
}

async fn run_enrichment(Extension(pipeline): Extension<Arc<Pipeline>>) -> impl IntoResponse {
    match pipeline.run_enrichment().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

async fn run_persistence(Extension(pipeline): Extension<Arc<Pipeline>>) -> impl IntoResponse {
    match pipeline.run_persistence().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

/// Read-only artifact browsing: lists the files of one stage directory,
/// addressed by its directory name (e.g. "1_discovery").
async fn list_stage_artifacts(
    Path(stage): Path<String>,
    Extension(pipeline): Extension<Arc<Pipeline>>,
) -> impl IntoResponse {
    let Some(stage) = Stage::from_dir_name(&stage) else {
        return (StatusCode::NOT_FOUND, "unknown stage").into_response();
    };
    match artifacts::artifact_file_names(&pipeline.config().data_dir, stage) {
        Ok(files) => Json(serde_json::json!({ "files": files })).into_response(),
        Err(e) => error_response(e),
    }
}

/// Create the HTTP server with all admin routes
pub fn create_server(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/admin/run", post(run_full))
        .route("/admin/discover", post(run_discovery))
        .route("/admin/filter", post(run_filters))
        .route("/admin/enrich", post(run_enrichment))
        .route("/admin/persist", post(run_persistence))
        .route("/data/:stage", get(list_stage_artifacts))
        .layer(Extension(pipeline))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(
    pipeline: Arc<Pipeline>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_server(pipeline);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("🚀 HTTP server running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("🕷️  Full run:     POST http://localhost:{port}/admin/run");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
