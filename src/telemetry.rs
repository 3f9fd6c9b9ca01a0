use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider, UpDownCounter},
    KeyValue,
};
use prometheus::Registry;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to build prometheus exporter: {0}")]
    Exporter(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Processed,
    DecodeFailed,
    DetectionFailed,
}

impl FrameOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameOutcome::Processed => "processed",
            FrameOutcome::DecodeFailed => "decode_failed",
            FrameOutcome::DetectionFailed => "detection_failed",
        }
    }
}

pub struct Metrics {
    frames_counter: Counter<u64>,
    detections_counter: Counter<u64>,
    inference_duration: Histogram<u64>,
    active_sessions: UpDownCounter<i64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("yolo_stream");
        global::set_meter_provider(provider);

        let frames_counter = meter
            .u64_counter("frames_total")
            .with_description("Total number of frames received, by outcome")
            .build();

        let detections_counter = meter
            .u64_counter("detections_total")
            .with_description("Total number of detections sent to clients")
            .build();

        let boundaries = generate_boundaries((15, 30, 60, 500, 1000));

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of model inference in milliseconds")
            .build();

        let active_sessions = meter
            .i64_up_down_counter("active_sessions")
            .with_description("Number of open detection stream sessions")
            .build();

        Ok(Metrics {
            frames_counter,
            detections_counter,
            inference_duration,
            active_sessions,
            registry,
        })
    }

    pub fn record_frame(&self, outcome: FrameOutcome) {
        let attributes = [KeyValue::new("outcome", outcome.as_str())];
        self.frames_counter.add(1, &attributes);
    }

    pub fn record_detections(&self, count: usize) {
        self.detections_counter.add(count as u64, &[]);
    }

    pub fn record_inference_duration(&self, duration_ms: u64) {
        self.inference_duration.record(duration_ms, &[]);
    }

    pub fn session_opened(&self) {
        self.active_sessions.add(1, &[]);
    }

    pub fn session_closed(&self) {
        self.active_sessions.add(-1, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
