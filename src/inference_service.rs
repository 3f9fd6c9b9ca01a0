use crate::{
    detection::RawDetection,
    frame::Frame,
    model_service::{DetectionError, ModelService},
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

/// The detection model could not be loaded at process start.
#[derive(Error, Debug, Clone)]
#[error("Detection model failed to load on backend: {reason}")]
pub struct ModelUnavailable {
    pub reason: String,
}

impl ModelUnavailable {
    pub fn new(reason: impl ToString) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

/// Runs the blocking model on tokio's blocking pool, with at most
/// `max_concurrency` inferences in flight across all sessions.
#[derive(Debug)]
pub struct InferenceService<M: ModelService> {
    model_service: Arc<M>,
    permits: Arc<Semaphore>,
}

impl<M: ModelService> Clone for InferenceService<M> {
    fn clone(&self) -> Self {
        Self {
            model_service: self.model_service.clone(),
            permits: self.permits.clone(),
        }
    }
}

impl<M: ModelService> InferenceService<M> {
    pub fn new(model_service: M, max_concurrency: usize) -> Self {
        Self {
            model_service: Arc::new(model_service),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub async fn detect(&self, frame: Frame) -> Result<Vec<RawDetection>, DetectionError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| DetectionError::WorkerUnavailable(e.to_string()))?;
        let model_service = self.model_service.clone();

        let detections = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            model_service.detect(&frame)
        })
        .await
        .map_err(|e| DetectionError::WorkerUnavailable(format!("inference task failed: {}", e)))??;

        tracing::debug!("Model returned {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class_id={}, confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.class_id,
                detection.confidence,
                detection.x1,
                detection.y1,
                detection.x2,
                detection.y2
            );
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockModelService {
        in_flight: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl ModelService for MockModelService {
        fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(vec![RawDetection {
                x1: 0.,
                y1: 0.,
                x2: frame.width() as f32,
                y2: frame.height() as f32,
                confidence: 0.5,
                class_id: 7,
            }])
        }
    }

    struct PanickingModelService;

    impl ModelService for PanickingModelService {
        fn detect(&self, _frame: &Frame) -> Result<Vec<RawDetection>, DetectionError> {
            panic!("model crashed")
        }
    }

    fn frame() -> Frame {
        Frame::try_from(DynamicImage::ImageRgb8(RgbImage::new(8, 4))).unwrap()
    }

    #[tokio::test]
    async fn test_detect() -> Result<(), Box<dyn std::error::Error>> {
        let service = InferenceService::new(
            MockModelService {
                in_flight: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
            },
            1,
        );

        let detections = service.detect(frame()).await?;

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 7);
        assert_eq!(detections[0].x2, 8.);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let service = InferenceService::new(
            MockModelService {
                in_flight: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
            },
            2,
        );

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.detect(frame()).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert!(service.model_service.max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_model_panic_is_fatal_error() {
        let service = InferenceService::new(PanickingModelService, 1);

        let err = service.detect(frame()).await.unwrap_err();

        assert!(err.is_fatal());
    }
}
