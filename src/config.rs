use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub labels: LabelsConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

pub trait Validatable {
    fn get_path(&self) -> PathBuf;

    fn validate(&self) -> Result<(), String> {
        let path = self.get_path();
        if !path.exists() {
            return Err(format!("File not found: {:?}", path));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_min_probability")]
    pub min_probability: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(5)
}

fn default_input_size() -> u32 {
    640
}

fn default_min_probability() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.7
}

fn default_max_detections() -> usize {
    300
}

impl Validatable for ModelConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

/// Category vocabulary. `labels_file`, when set, replaces `names`.
#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    #[serde(default = "default_label_names")]
    pub names: Vec<String>,
    #[serde(default)]
    pub labels_file: Option<PathBuf>,
    #[serde(default = "default_unknown_label")]
    pub unknown_label: String,
}

fn default_label_names() -> Vec<String> {
    ["shorts", "sleeveless_top", "opened_foot"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_unknown_label() -> String {
    "UNKNOWN".to_string()
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            names: default_label_names(),
            labels_file: None,
            unknown_label: default_unknown_label(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    config.try_deserialize::<Config>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_yaml(yaml: &str) -> Result<Config, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize::<Config>()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = from_yaml(
            r#"
server:
  host: 127.0.0.1
  port: 8000
log_level: info
model:
  onnx_file: yolov8s.onnx
  model_dir: models
"#,
        )
        .unwrap();

        assert_eq!(config.server.get_address(), "127.0.0.1:8000");
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.model.input_size, 640);
        assert_eq!(config.model.get_path(), PathBuf::from("models/yolov8s.onnx"));
        assert_eq!(
            config.labels.names,
            vec!["shorts", "sleeveless_top", "opened_foot"]
        );
        assert_eq!(config.labels.unknown_label, "UNKNOWN");
        assert_eq!(config.stream.max_frame_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_log_level_is_rejected() {
        let result = from_yaml(
            r#"
server:
  host: 127.0.0.1
  port: 8000
log_level: verbose
model:
  onnx_file: yolov8s.onnx
  model_dir: models
"#,
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert!(matches!(
            Environment::try_from("Production".to_string()),
            Ok(Environment::Production)
        ));
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn test_missing_model_file_fails_validation() {
        let model = ModelConfig {
            onnx_file: "missing.onnx".to_string(),
            model_dir: PathBuf::from("./does_not_exist"),
            num_instances: 1,
            input_size: 640,
            min_probability: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
        };

        assert!(model.validate().is_err());
    }
}
