// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod errors;
pub mod handlers;
pub mod http_server;
pub mod request;
pub mod response;

pub use errors::{ApiError, ErrorResponse};
pub use http_server::{build_router, start_server, AppState};
pub use request::{Base64Request, UrlRequest};
pub use response::{ExtractResponse, HealthResponse, RootResponse};
