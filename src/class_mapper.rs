use crate::config::LabelsConfig;
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Label at index {0} is empty")]
    EmptyLabel(usize),
    #[error("Unknown label must not be empty")]
    EmptyUnknownLabel,
}

/// Maps model class indices to the category names sent to clients.
#[derive(Debug, Clone)]
pub struct ClassMapper {
    class_labels: Vec<String>,
    unknown_label: String,
}

impl ClassMapper {
    pub fn new(
        class_labels: Vec<String>,
        unknown_label: impl Into<String>,
    ) -> Result<Self, LabelsError> {
        let unknown_label = unknown_label.into();
        if unknown_label.trim().is_empty() {
            return Err(LabelsError::EmptyUnknownLabel);
        }
        if let Some(index) = class_labels.iter().position(|l| l.trim().is_empty()) {
            return Err(LabelsError::EmptyLabel(index));
        }

        Ok(Self {
            class_labels,
            unknown_label,
        })
    }

    pub fn from_config(labels_cfg: &LabelsConfig) -> Result<Self, LabelsError> {
        let class_labels = match &labels_cfg.labels_file {
            Some(path) => load_labels(path)?,
            None => labels_cfg.names.clone(),
        };
        Self::new(class_labels, labels_cfg.unknown_label.clone())
    }

    pub fn map(&self, class_id: i64) -> &str {
        usize::try_from(class_id)
            .ok()
            .and_then(|index| self.class_labels.get(index))
            .map(String::as_str)
            .unwrap_or(&self.unknown_label)
    }

    pub fn labels(&self) -> &[String] {
        &self.class_labels
    }

    pub fn unknown_label(&self) -> &str {
        &self.unknown_label
    }
}

/// Reads one label per line. Blank lines are skipped and do not take an index.
pub fn load_labels(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.trim();
        if !label.is_empty() {
            labels.push(label.to_string());
        }
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mapper() -> ClassMapper {
        ClassMapper::new(
            vec![
                "shorts".to_string(),
                "sleeveless_top".to_string(),
                "opened_foot".to_string(),
            ],
            "UNKNOWN",
        )
        .unwrap()
    }

    #[test]
    fn test_known_indices() {
        let mapper = mapper();

        assert_eq!(mapper.map(0), "shorts");
        assert_eq!(mapper.map(1), "sleeveless_top");
        assert_eq!(mapper.map(2), "opened_foot");
    }

    #[test]
    fn test_out_of_range_indices_map_to_unknown() {
        let mapper = mapper();

        for class_id in [3, 99, -1, i64::MIN, i64::MAX] {
            assert_eq!(mapper.map(class_id), "UNKNOWN");
        }
    }

    #[test]
    fn test_empty_vocabulary_maps_everything_to_unknown() {
        let mapper = ClassMapper::new(vec![], "UNKNOWN").unwrap();

        assert_eq!(mapper.map(0), "UNKNOWN");
    }

    #[test]
    fn test_empty_names_are_rejected() {
        assert!(matches!(
            ClassMapper::new(vec!["shorts".to_string(), " ".to_string()], "UNKNOWN"),
            Err(LabelsError::EmptyLabel(1))
        ));
        assert!(matches!(
            ClassMapper::new(vec!["shorts".to_string()], ""),
            Err(LabelsError::EmptyUnknownLabel)
        ));
    }

    #[test]
    fn test_labels_file_overrides_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "person\n\n  bicycle  \ncar").unwrap();

        let cfg = LabelsConfig {
            names: vec!["shorts".to_string()],
            labels_file: Some(file.path().to_path_buf()),
            unknown_label: "UNKNOWN".to_string(),
        };
        let mapper = ClassMapper::from_config(&cfg).unwrap();

        assert_eq!(mapper.labels(), ["person", "bicycle", "car"]);
        assert_eq!(mapper.map(1), "bicycle");
        assert_eq!(mapper.map(3), "UNKNOWN");
    }

    #[test]
    fn test_missing_labels_file() {
        let cfg = LabelsConfig {
            labels_file: Some("./dummy_labels_dir/missing.txt".into()),
            ..LabelsConfig::default()
        };

        assert!(matches!(
            ClassMapper::from_config(&cfg),
            Err(LabelsError::Io(_))
        ));
    }
}
