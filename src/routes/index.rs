use axum::response::Html;

pub async fn index() -> Html<&'static str> {
    Html(
        "<h1>YOLO WebSocket Inference Backend</h1>\
         <p>Connect to /ws/detect_stream for real-time detection.</p>",
    )
}
