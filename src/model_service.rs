use crate::{detection::RawDetection, frame::Frame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Failed to build input tensor: {0}")]
    Input(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Invalid model output: {0}")]
    Output(String),
    #[error("Model session poisoned: {0}")]
    Poisoned(String),
    #[error("Inference worker unavailable: {0}")]
    WorkerUnavailable(String),
}

impl DetectionError {
    /// Whether the model can no longer be trusted for further frames.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DetectionError::Poisoned(_) | DetectionError::WorkerUnavailable(_)
        )
    }
}

/// An object detector treated as a black box.
///
/// `detect` is synchronous and may block for the whole inference. It must not
/// mutate the frame and must be safe to call from several threads at once.
pub trait ModelService: Send + Sync + 'static {
    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionError>;
}
