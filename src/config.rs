use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct RunConfig {
    pub description: Option<String>,
    pub tasks: Vec<TaskConfig>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum TaskConfig {
    Prep {
        input: PathBuf,
        output: PathBuf,
        #[serde(default = "default_batch_size")]
        batch_size: usize,
    },
    Combine {
        data: PathBuf,
        output: PathBuf,
    },
    Skeleton {
        masks: PathBuf,
        output: PathBuf,
        pixel_size: f64,
    },
}

pub fn default_batch_size() -> usize {
    25
}

impl TaskConfig {
    pub fn describe(&self) -> String {
        match self {
            TaskConfig::Prep { input, .. } => format!("prep: {}", input.display()),
            TaskConfig::Combine { data, .. } => format!("combine: {}", data.display()),
            TaskConfig::Skeleton { masks, .. } => format!("skeleton: {}", masks.display()),
        }
    }
}

pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open run configuration file: {}", path.display()))?;
    let config: RunConfig = serde_yaml::from_reader(file)
        .with_context(|| format!("Failed to parse run configuration YAML from {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_task_list() {
        let yaml = "\
description: full study
tasks:
  - stage: prep
    input: raw_masks
    output: study
  - stage: combine
    data: study/FracLacBatch/FracLacData
    output: study
  - stage: skeleton
    masks: study/FracLacImages
    output: study/skeletons
    pixel_size: 0.316
";
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.description.as_deref(), Some("full study"));
        assert_eq!(config.tasks.len(), 3);

        match &config.tasks[0] {
            TaskConfig::Prep { batch_size, .. } => assert_eq!(*batch_size, 25),
            other => panic!("expected prep task, got {:?}", other),
        }
        match &config.tasks[2] {
            TaskConfig::Skeleton { pixel_size, .. } => assert_eq!(*pixel_size, 0.316),
            other => panic!("expected skeleton task, got {:?}", other),
        }
    }

    #[test]
    fn unknown_stages_are_rejected() {
        let yaml = "\
tasks:
  - stage: fractalize
    input: a
    output: b
";
        assert!(serde_yaml::from_str::<RunConfig>(yaml).is_err());
    }
}
