//! `api` crate: HTTP REST API layer.
//!
//! Routes (all JSON):
//!   POST /api/v1/workflows                      create a draft
//!   GET  /api/v1/workflows                      list
//!   GET  /api/v1/workflows/:id                  fetch
//!   PUT  /api/v1/workflows/:id/graph            replace the draft graph
//!   POST /api/v1/workflows/:id/publish          compile and activate
//!   POST /api/v1/workflows/:id/unpublish        deactivate
//!   GET  /api/v1/workflows/:id/steps            current compiled chain
//!   POST /api/v1/events                         ingest an event
//!   GET  /api/v1/runs/:id                       fetch a run
//!   GET  /api/v1/runs/:id/executions            step executions of a run
//!   POST /api/v1/runs/:id/abort                 abort a run

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use db::Store;
use engine::Publisher;
use queue::Dispatcher;

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub publisher: Arc<Publisher>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Build state around an already-configured dispatcher, sharing its store.
    pub fn new(dispatcher: Dispatcher) -> Self {
        let store = dispatcher.engine().store().clone();
        Self {
            publisher: Arc::new(Publisher::new(store.clone())),
            dispatcher: Arc::new(dispatcher),
            store,
        }
    }
}

pub fn router(state: AppState) -> Router {
    use handlers::{events, runs, workflows};

    Router::new()
        .route("/api/v1/workflows", post(workflows::create).get(workflows::list))
        .route("/api/v1/workflows/:id", get(workflows::get))
        .route("/api/v1/workflows/:id/graph", put(workflows::update_graph))
        .route("/api/v1/workflows/:id/publish", post(workflows::publish))
        .route("/api/v1/workflows/:id/unpublish", post(workflows::unpublish))
        .route("/api/v1/workflows/:id/steps", get(workflows::steps))
        .route("/api/v1/events", post(events::ingest))
        .route("/api/v1/runs/:id", get(runs::get))
        .route("/api/v1/runs/:id/executions", get(runs::executions))
        .route("/api/v1/runs/:id/abort", post(runs::abort))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}
