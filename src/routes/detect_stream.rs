use crate::{
    gateway::WsConnection, model_service::ModelService, server::SharedState,
    session::StreamSession,
};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};

pub async fn detect_stream<M: ModelService>(
    ws: WebSocketUpgrade,
    State(state): State<SharedState<M>>,
) -> Response {
    let max_frame_bytes = state.stream_config.max_frame_bytes;

    ws.max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_upgrade(move |socket| async move {
            let _session_guard = state.session_guard.clone();
            let session = StreamSession::new(
                WsConnection::new(socket),
                state.model.clone(),
                state.class_mapper.clone(),
                state.metrics.clone(),
                state.shutdown_tx.subscribe(),
            );
            session.run().await;
        })
}
