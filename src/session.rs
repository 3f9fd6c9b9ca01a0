use crate::{
    class_mapper::ClassMapper,
    detection::{Detection, DetectionBatch},
    frame::{self, DecodeError},
    gateway::{Connection, Incoming},
    inference_service::{InferenceService, ModelUnavailable},
    message::OutboundMessage,
    model_service::{DetectionError, ModelService},
    telemetry::{FrameOutcome, Metrics},
};
use bytes::Bytes;
use std::{
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnected,
    TransportFault,
    ModelUnavailable,
    ModelFailure,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub state: SessionState,
    pub reason: CloseReason,
    pub batches_sent: u64,
    pub frames_skipped: u64,
}

#[derive(Error, Debug)]
enum FrameError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Detection(#[from] DetectionError),
}

/// Millisecond wall-clock stamps that never go backwards within a session.
#[derive(Debug, Clone, Copy)]
struct SessionClock {
    origin: Instant,
    origin_ms: u64,
}

impl SessionClock {
    fn start() -> Self {
        let origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            origin: Instant::now(),
            origin_ms,
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// One client connection driven through the detection loop.
pub struct StreamSession<M: ModelService, C: Connection> {
    id: Uuid,
    connection: C,
    model: Result<InferenceService<M>, ModelUnavailable>,
    class_mapper: Arc<ClassMapper>,
    metrics: Arc<Metrics>,
    shutdown_rx: broadcast::Receiver<()>,
    clock: SessionClock,
    state: SessionState,
    batches_sent: u64,
    frames_skipped: u64,
}

impl<M: ModelService, C: Connection> StreamSession<M, C> {
    pub fn new(
        connection: C,
        model: Result<InferenceService<M>, ModelUnavailable>,
        class_mapper: Arc<ClassMapper>,
        metrics: Arc<Metrics>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection,
            model,
            class_mapper,
            metrics,
            shutdown_rx,
            clock: SessionClock::start(),
            state: SessionState::Connecting,
            batches_sent: 0,
            frames_skipped: 0,
        }
    }

    #[tracing::instrument(name = "stream_session", skip(self), fields(session_id = %self.id))]
    pub async fn run(mut self) -> SessionSummary {
        tracing::info!("Client connected");
        self.metrics.session_opened();

        let reason = match self.model.clone() {
            Ok(inference) => {
                self.transition(SessionState::Active);
                self.stream(&inference).await
            }
            Err(unavailable) => {
                tracing::error!("Rejecting session: {}", unavailable);
                if let Err(e) = self
                    .connection
                    .send(&OutboundMessage::error(&unavailable))
                    .await
                {
                    tracing::warn!("Failed to send error message: {}", e);
                }
                CloseReason::ModelUnavailable
            }
        };

        self.transition(SessionState::Closing);
        if let Err(e) = self.connection.close().await {
            tracing::debug!("Close handshake failed: {}", e);
        }
        self.transition(SessionState::Closed);
        self.metrics.session_closed();

        tracing::info!(
            reason = ?reason,
            batches_sent = self.batches_sent,
            frames_skipped = self.frames_skipped,
            "Client disconnected"
        );

        SessionSummary {
            state: self.state,
            reason,
            batches_sent: self.batches_sent,
            frames_skipped: self.frames_skipped,
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!("Session state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn stream(&mut self, inference: &InferenceService<M>) -> CloseReason {
        loop {
            let incoming = tokio::select! {
                incoming = self.connection.receive() => incoming,
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("Session received shutdown signal");
                    return CloseReason::Shutdown;
                }
            };

            let bytes = match incoming {
                Ok(Incoming::Frame(bytes)) => bytes,
                Ok(Incoming::Ignored) => continue,
                Ok(Incoming::Unexpected(kind)) => {
                    tracing::warn!("Skipping {} message, expected a binary frame", kind);
                    self.frames_skipped += 1;
                    continue;
                }
                Ok(Incoming::Disconnected) => return CloseReason::ClientDisconnected,
                Err(e) => {
                    tracing::error!("Transport error: {}", e);
                    return CloseReason::TransportFault;
                }
            };

            let frame_len = bytes.len();
            let processed =
                process_frame(inference, &self.class_mapper, &self.metrics, &self.clock, bytes)
                    .await;
            let batch = match processed {
                Ok(batch) => batch,
                Err(FrameError::Decode(e)) => {
                    tracing::warn!("Failed to decode frame of {} bytes: {}", frame_len, e);
                    self.metrics.record_frame(FrameOutcome::DecodeFailed);
                    self.frames_skipped += 1;
                    continue;
                }
                Err(FrameError::Detection(e)) if e.is_fatal() => {
                    tracing::error!("Detection model failed: {}", e);
                    self.metrics.record_frame(FrameOutcome::DetectionFailed);
                    let message = OutboundMessage::error(&e);
                    if let Err(send_err) = self.connection.send(&message).await {
                        tracing::warn!("Failed to send error message: {}", send_err);
                    }
                    return CloseReason::ModelFailure;
                }
                Err(FrameError::Detection(e)) => {
                    tracing::warn!("Skipping frame, detection failed: {}", e);
                    self.metrics.record_frame(FrameOutcome::DetectionFailed);
                    self.frames_skipped += 1;
                    continue;
                }
            };

            self.metrics.record_frame(FrameOutcome::Processed);
            self.metrics.record_detections(batch.len());

            let message = OutboundMessage::from(batch);
            if let Err(e) = self.connection.send(&message).await {
                tracing::error!("Transport error: {}", e);
                return CloseReason::TransportFault;
            }
            self.batches_sent += 1;
        }
    }
}

async fn process_frame<M: ModelService>(
    inference: &InferenceService<M>,
    class_mapper: &ClassMapper,
    metrics: &Metrics,
    clock: &SessionClock,
    bytes: Bytes,
) -> Result<DetectionBatch, FrameError> {
    let frame = frame::decode_blocking(bytes).await?;
    tracing::debug!(
        "Decoded {}x{} frame with {} channels",
        frame.width(),
        frame.height(),
        frame.channels()
    );

    let started = Instant::now();
    let raw_detections = inference.detect(frame).await?;
    metrics.record_inference_duration(started.elapsed().as_millis() as u64);

    let timestamp = clock.now_ms();
    let detections = raw_detections
        .iter()
        .map(|raw| Detection::from_raw(raw, class_mapper.map(raw.class_id), timestamp))
        .collect();

    Ok(DetectionBatch { detections })
}
