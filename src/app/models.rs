use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
}

impl DeviceSummary {
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApkInfo {
    pub path: String,
    pub file_size_bytes: u64,
    pub is_split_bundle: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pass,
    Warn,
    Fail,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    pub duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub trace_id: String,
    pub package_name: String,
    pub package_path: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stages: Vec<StageReport>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.status == RunStatus::Pass
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn total_duration(&self) -> Duration {
        let millis: u128 = self.stages.iter().map(|stage| stage.duration_ms).sum();
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_serializes_lowercase_statuses_and_skips_empty_fields() {
        let summary = RunSummary {
            trace_id: "trace-1".to_string(),
            package_name: "com.example".to_string(),
            package_path: "app.apk".to_string(),
            status: RunStatus::Fail,
            log_path: None,
            error_code: Some("ERR_NO_DEVICE".to_string()),
            error: Some("No connected Android device".to_string()),
            stages: vec![StageReport {
                name: "prerequisites".to_string(),
                status: StageStatus::Fail,
                duration_ms: 12,
                error_code: Some("ERR_NO_DEVICE".to_string()),
                detail: None,
            }],
        };

        let value = serde_json::to_value(&summary).expect("json");
        assert_eq!(value["status"], "fail");
        assert_eq!(value["stages"][0]["status"], "fail");
        assert!(value.get("log_path").is_none());
        assert!(value["stages"][0].get("detail").is_none());
        assert!(!summary.success());
        assert_eq!(summary.total_duration(), Duration::from_millis(12));
    }
}
