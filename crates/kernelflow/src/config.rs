use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::tensor::DataType;

/// Job-level settings every kernel of a job shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub job_name: String,
    pub default_data_type: DataType,
    /// Record every checked blob access on launch outputs.
    pub access_log: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job_name: "default".to_string(),
            default_data_type: DataType::Float,
            access_log: false,
        }
    }
}

/// Resource settings for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Visible GPUs on this machine; zero means a CPU-only session.
    pub gpu_device_num: usize,
    pub process_num: usize,
    /// Capacity of each named job-instance buffer.
    pub buffer_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gpu_device_num: 0,
            process_num: 1,
            buffer_capacity: 16,
        }
    }
}

fn parse_json<T: DeserializeOwned>(src: &str, what: &str) -> Result<T> {
    serde_json::from_str(src).with_context(|| format!("failed to parse {what}"))
}

fn load_json_file<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} from {}", path.display()))?;
    parse_json(&contents, what).with_context(|| format!("in {}", path.display()))
}

impl JobConfig {
    pub fn from_json_str(src: &str) -> Result<Self> {
        parse_json(src, "job config")
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json_file(path.as_ref(), "job config")
    }
}

impl SessionConfig {
    pub fn from_json_str(src: &str) -> Result<Self> {
        parse_json(src, "session config")
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json_file(path.as_ref(), "session config")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let job = JobConfig::from_json_str(r#"{ "job_name": "train" }"#).unwrap();
        assert_eq!(job.job_name, "train");
        assert_eq!(job.default_data_type, DataType::Float);
        assert!(!job.access_log);
    }

    #[test]
    fn session_config_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "gpu_device_num": 2, "process_num": 3 }}"#).unwrap();
        let config = SessionConfig::load_json(file.path()).unwrap();
        assert_eq!(config.gpu_device_num, 2);
        assert_eq!(config.process_num, 3);
        assert_eq!(config.buffer_capacity, 16);
    }

    #[test]
    fn malformed_json_reports_context() {
        let err = JobConfig::from_json_str("{").unwrap_err();
        assert!(err.to_string().contains("failed to parse job config"));
    }
}
