use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Status {
    status: String,
}

pub async fn healthcheck<M: ModelService>(State(state): State<SharedState<M>>) -> Json<Status> {
    let status = match state.model {
        Ok(_) => "Available",
        Err(_) => "Degraded",
    };
    Json(Status {
        status: status.into(),
    })
}
