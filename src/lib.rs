// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod archive;
pub mod config;
pub mod errors;
pub mod extract;
pub mod fetch;
pub mod sandbox;
pub mod scope;
pub mod service;
pub mod version;

// Re-export main types
pub use config::ExtractionConfig;
pub use errors::{ErrorClass, ExtractError};
pub use extract::{ContentExtractor, ExtractionUnit, Format};
pub use fetch::{FetchOptions, RemoteFetcher, UrlGuard};
pub use sandbox::Sandbox;
pub use scope::RequestScope;
pub use service::ExtractionService;
