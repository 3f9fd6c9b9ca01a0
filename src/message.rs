use crate::detection::DetectionBatch;
use serde::Serialize;

/// Messages pushed to the client, serialized as `{"detections": [...]}` or
/// `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Detections(DetectionBatch),
    Error { error: String },
}

impl OutboundMessage {
    pub fn error(message: impl ToString) -> Self {
        OutboundMessage::Error {
            error: message.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<DetectionBatch> for OutboundMessage {
    fn from(batch: DetectionBatch) -> Self {
        OutboundMessage::Detections(batch)
    }
}
