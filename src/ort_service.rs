use crate::{
    config::{ModelConfig, Validatable},
    detection::RawDetection,
    frame::Frame,
    model_service::{DetectionError, ModelService},
};
use image::imageops::FilterType;
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use thiserror::Error;

const OUTPUT_NAME: &str = "output0";

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct PostprocessParams {
    pub input_size: u32,
    pub min_probability: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl From<&ModelConfig> for PostprocessParams {
    fn from(cfg: &ModelConfig) -> Self {
        Self {
            input_size: cfg.input_size,
            min_probability: cfg.min_probability,
            iou_threshold: cfg.iou_threshold,
            max_detections: cfg.max_detections,
        }
    }
}

impl PostprocessParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.input_size == 0 {
            return Err("input_size must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_probability) {
            return Err(format!(
                "min_probability must be within [0, 1], got {}",
                self.min_probability
            ));
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(format!(
                "iou_threshold must be within (0, 1], got {}",
                self.iou_threshold
            ));
        }
        Ok(())
    }
}

fn intersection(box1: &RawDetection, box2: &RawDetection) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.);
    width * height
}

fn union(box1: &RawDetection, box2: &RawDetection) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn iou(box1: &RawDetection, box2: &RawDetection) -> f32 {
    let union = union(box1, box2);
    if union <= 0. {
        return 0.;
    }
    intersection(box1, box2) / union
}

/// Resizes the frame to the square model input and lays it out as a
/// normalized NCHW RGB tensor.
fn transform_frame(frame: &Frame, input_size: u32) -> Array<f32, Ix4> {
    let img = frame
        .image()
        .resize_exact(input_size, input_size, FilterType::CatmullRom)
        .to_rgb8();

    let size = input_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in img.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Decodes a `[1, 4 + classes, anchors]` output into corner boxes in source
/// image pixels, then applies per-class non-maximum suppression.
pub fn postprocess(
    output: ArrayViewD<'_, f32>,
    img_width: u32,
    img_height: u32,
    params: &PostprocessParams,
) -> Result<Vec<RawDetection>, DetectionError> {
    let output = output
        .into_dimensionality::<Ix3>()
        .map_err(|e| DetectionError::Output(format!("expected a 3d tensor: {}", e)))?;
    let (batch, features, _anchors) = output.dim();
    if batch == 0 || features <= 4 {
        return Err(DetectionError::Output(format!(
            "unexpected output shape {:?}",
            output.shape()
        )));
    }

    let scale_x = img_width as f32 / params.input_size as f32;
    let scale_y = img_height as f32 / params.input_size as f32;
    let max_x = img_width as f32;
    let max_y = img_height as f32;

    let mut boxes = Vec::new();
    let output = output.index_axis(Axis(0), 0);

    for row in output.t().axis_iter(Axis(0)) {
        let Some((class_id, prob)) = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
        else {
            continue;
        };

        if prob < params.min_probability {
            continue;
        }

        let xc = row[0] * scale_x;
        let yc = row[1] * scale_y;
        let w = row[2] * scale_x;
        let h = row[3] * scale_y;

        boxes.push(RawDetection {
            x1: (xc - w / 2.).clamp(0., max_x),
            y1: (yc - h / 2.).clamp(0., max_y),
            x2: (xc + w / 2.).clamp(0., max_x),
            y2: (yc + h / 2.).clamp(0., max_y),
            confidence: prob,
            class_id: class_id as i64,
        });
    }

    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result: Vec<RawDetection> = Vec::new();
    for candidate in boxes {
        if result.len() >= params.max_detections {
            break;
        }
        let suppressed = result.iter().any(|kept| {
            kept.class_id == candidate.class_id && iou(kept, &candidate) >= params.iou_threshold
        });
        if !suppressed {
            result.push(candidate);
        }
    }

    Ok(result)
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Mutex<Session>>>,
    counter: Arc<AtomicUsize>,
    params: PostprocessParams,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelLoadError> {
        if model_config.num_instances == 0 {
            return Err(ModelLoadError::InvalidConfig(
                "num_instances must be at least 1".to_string(),
            ));
        }
        let params = PostprocessParams::from(model_config);
        params.validate().map_err(ModelLoadError::InvalidConfig)?;
        model_config
            .validate()
            .map_err(ModelLoadError::InvalidConfig)?;

        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            params,
        })
    }

    pub fn num_instances(&self) -> usize {
        self.sessions.len()
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, DetectionError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| DetectionError::Poisoned(format!("session {}: {}", index, e)))?;

        tracing::debug!("Handling frame with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectionError::Input(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let (shape, data) = outputs[OUTPUT_NAME]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Output(format!("failed to extract tensor: {}", e)))?;

        ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| DetectionError::Output(format!("invalid tensor shape: {}", e)))
    }
}

impl ModelService for OrtModelService {
    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionError> {
        let input = transform_frame(frame, self.params.input_size);
        let output = self.run_inference(&input)?;
        postprocess(output.view(), frame.width(), frame.height(), &self.params)
    }
}
