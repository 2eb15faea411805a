// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    extract_base64_handler, extract_file_handler, extract_url_handler, health_handler,
    root_handler, supported_formats_handler,
};
use crate::service::ExtractionService;

/// Room for multipart framing and base64 expansion above the file limit
const BODY_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ExtractionService>,
}

impl AppState {
    pub fn new(service: ExtractionService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

/// Request body ceiling derived from the configured file limit
fn body_limit(max_file_size: u64) -> usize {
    let encoded = max_file_size.saturating_mul(4) / 3;
    usize::try_from(encoded)
        .unwrap_or(usize::MAX)
        .saturating_add(BODY_OVERHEAD)
}

pub fn build_router(state: AppState) -> Router {
    let limit = body_limit(state.service.config().max_file_size);
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/v1/supported-formats", get(supported_formats_handler))
        .route("/v1/extract/file", post(extract_file_handler))
        .route("/v1/extract/base64", post(extract_base64_handler))
        .route("/v1/extract/url", post(extract_url_handler))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind and serve until ctrl-c
pub async fn start_server(service: ExtractionService) -> anyhow::Result<()> {
    let addr: SocketAddr =
        format!("{}:{}", service.config().api_host, service.config().api_port).parse()?;
    let app = build_router(AppState::new(service));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
