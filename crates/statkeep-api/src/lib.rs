//! statkeep-api — HTTP surface for the collector.
//!
//! Thin axum handlers in front of [`UpdateService`]; all merge semantics
//! live below this layer. Request and response bodies may be gzipped.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/update/{type}/{name}/{value}` | Update one metric from path segments |
//! | GET | `/value/{type}/{name}` | Read one metric as plain text |
//! | POST | `/update/` | Update one metric from a JSON sample |
//! | POST | `/updates/` | Update a batch of JSON samples |
//! | POST | `/value/` | Read one metric as a JSON sample |
//! | GET | `/` | HTML listing of every metric |
//! | GET | `/ping` | Backend reachability |

pub mod error;
pub mod gzip;
pub mod handlers;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};

use statkeep_service::UpdateService;
use statkeep_sign::Signer;

pub use error::ApiError;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: UpdateService,
    /// Present when a shared key is configured.
    pub signer: Option<Signer>,
}

/// Build the complete collector router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(handlers::list_metrics))
        .route("/ping", get(handlers::ping))
        .route("/update/{kind}/{name}/{value}", post(handlers::update_from_path))
        .route("/value/{kind}/{name}", get(handlers::value_from_path))
        .route("/update/", post(handlers::update_json))
        .route("/updates/", post(handlers::update_batch))
        .route("/value/", post(handlers::value_json))
        .layer(middleware::from_fn(gzip::gzip))
        .with_state(state)
}
