mod detect_stream;
mod health;
mod index;
mod metrics;

use crate::{model_service::ModelService, server::SharedState};
use axum::{routing::get, Router};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(index::index))
        .route("/health", get(health::healthcheck::<M>))
        .route("/metrics", get(metrics::metrics_handler::<M>))
        .route("/ws/detect_stream", get(detect_stream::detect_stream::<M>))
}
