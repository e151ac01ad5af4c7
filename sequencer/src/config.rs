//! Workflow parameters
//!
//! Parameters are read once, at tree-build time, from a [`ParameterSource`].
//! Scalar values are then published into the blackboard under their
//! parameter names so tree definitions can reference them as `{name}`.

use crate::blackboard::Blackboard;
use crate::error::ConfigurationError;
use crate::transport::{RemoteTimeouts, DEFAULT_LONG_TIMEOUT_SECS, DEFAULT_SHORT_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const MOTION_GROUP_PARAM: &str = "motion_group";
pub const REF_FRAME_PARAM: &str = "reference_frame";
pub const TCP_FRAME_PARAM: &str = "tcp_frame";
pub const CAMERA_FRAME_PARAM: &str = "camera_frame";
pub const MESH_FILE_PARAM: &str = "mesh_file";
pub const START_STATE_REPLACEMENT_TOLERANCE_PARAM: &str = "start_state_replacement_tolerance";
pub const BT_FILES_PARAM: &str = "bt_files";
pub const BT_PARAM: &str = "tree";
pub const BT_SHORT_TIMEOUT_PARAM: &str = "bt_short_timeout";
pub const BT_LONG_TIMEOUT_PARAM: &str = "bt_long_timeout";

/// One degree, in radians
pub const DEFAULT_START_STATE_REPLACEMENT_TOLERANCE: f64 = std::f64::consts::PI / 180.0;

/// A named typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    StringList(Vec<String>),
}

impl ParameterValue {
    fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::Bool(_) => "bool",
            ParameterValue::Integer(_) => "integer",
            ParameterValue::Double(_) => "double",
            ParameterValue::String(_) => "string",
            ParameterValue::StringList(_) => "string list",
        }
    }
}

/// Source of named typed values, e.g. a node's parameter server
pub trait ParameterSource: Send + Sync {
    fn get(&self, name: &str) -> Option<ParameterValue>;
}

/// In-memory parameter source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticParameters {
    values: HashMap<String, ParameterValue>,
}

impl StaticParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a flat JSON object of parameter values
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn set(&mut self, name: impl Into<String>, value: ParameterValue) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.set(name, value);
        self
    }
}

impl ParameterSource for StaticParameters {
    fn get(&self, name: &str) -> Option<ParameterValue> {
        self.values.get(name).cloned()
    }
}

/// Parameters of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub motion_group: String,
    pub reference_frame: String,
    pub tcp_frame: String,
    pub camera_frame: String,
    pub mesh_file: String,
    /// Radians
    pub start_state_replacement_tolerance: f64,
    pub bt_files: Vec<String>,
    pub tree: String,
    /// Seconds
    pub bt_short_timeout: f64,
    /// Seconds
    pub bt_long_timeout: f64,
}

fn mismatch(name: &str, expected: &str, found: &ParameterValue) -> ConfigurationError {
    ConfigurationError::InvalidParameter {
        name: name.to_string(),
        reason: format!("expected {}, found {}", expected, found.type_name()),
    }
}

fn read_string(source: &dyn ParameterSource, name: &str) -> Result<String, ConfigurationError> {
    match source.get(name) {
        None => Ok(String::new()),
        Some(ParameterValue::String(s)) => Ok(s),
        Some(other) => Err(mismatch(name, "string", &other)),
    }
}

fn read_non_negative(source: &dyn ParameterSource, name: &str, default: f64) -> Result<f64, ConfigurationError> {
    let value = match source.get(name) {
        None => default,
        Some(ParameterValue::Integer(i)) => i as f64,
        Some(ParameterValue::Double(d)) => d,
        Some(other) => return Err(mismatch(name, "number", &other)),
    };
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigurationError::InvalidParameter {
            name: name.to_string(),
            reason: format!("must be a non-negative number, got {}", value),
        });
    }
    Ok(value)
}

fn read_timeout(source: &dyn ParameterSource, name: &str, default: f64) -> Result<f64, ConfigurationError> {
    let secs = read_non_negative(source, name, default)?;
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigurationError::InvalidParameter {
        name: name.to_string(),
        reason: format!("{} seconds is not a usable timeout: {}", secs, e),
    })?;
    Ok(secs)
}

impl WorkflowConfig {
    /// Read every workflow parameter.
    ///
    /// Missing tree sources are reported before a missing tree name.
    pub fn from_parameters(source: &dyn ParameterSource) -> Result<Self, ConfigurationError> {
        let bt_files = match source.get(BT_FILES_PARAM) {
            None => Vec::new(),
            Some(ParameterValue::StringList(files)) => files,
            Some(ParameterValue::String(file)) if !file.is_empty() => vec![file],
            Some(ParameterValue::String(_)) => Vec::new(),
            Some(other) => return Err(mismatch(BT_FILES_PARAM, "string list", &other)),
        };
        if bt_files.is_empty() {
            return Err(ConfigurationError::EmptyTreeSources);
        }

        let tree = read_string(source, BT_PARAM)?;
        if tree.is_empty() {
            return Err(ConfigurationError::MissingParameter(BT_PARAM.to_string()));
        }

        Ok(Self {
            motion_group: read_string(source, MOTION_GROUP_PARAM)?,
            reference_frame: read_string(source, REF_FRAME_PARAM)?,
            tcp_frame: read_string(source, TCP_FRAME_PARAM)?,
            camera_frame: read_string(source, CAMERA_FRAME_PARAM)?,
            mesh_file: read_string(source, MESH_FILE_PARAM)?,
            start_state_replacement_tolerance: read_non_negative(
                source,
                START_STATE_REPLACEMENT_TOLERANCE_PARAM,
                DEFAULT_START_STATE_REPLACEMENT_TOLERANCE,
            )?,
            bt_files,
            tree,
            bt_short_timeout: read_timeout(source, BT_SHORT_TIMEOUT_PARAM, DEFAULT_SHORT_TIMEOUT_SECS)?,
            bt_long_timeout: read_timeout(source, BT_LONG_TIMEOUT_PARAM, DEFAULT_LONG_TIMEOUT_SECS)?,
        })
    }

    pub fn timeouts(&self) -> RemoteTimeouts {
        RemoteTimeouts::from_secs(self.bt_short_timeout, self.bt_long_timeout)
    }

    /// Publish the scalar parameters into the blackboard
    pub fn publish(&self, blackboard: &Blackboard) {
        blackboard.set_text(MOTION_GROUP_PARAM, self.motion_group.as_str());
        blackboard.set_text(REF_FRAME_PARAM, self.reference_frame.as_str());
        blackboard.set_text(TCP_FRAME_PARAM, self.tcp_frame.as_str());
        blackboard.set_text(CAMERA_FRAME_PARAM, self.camera_frame.as_str());
        blackboard.set_text(MESH_FILE_PARAM, self.mesh_file.as_str());
        blackboard.set_number(
            START_STATE_REPLACEMENT_TOLERANCE_PARAM,
            self.start_state_replacement_tolerance,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> StaticParameters {
        StaticParameters::new()
            .with(BT_FILES_PARAM, ParameterValue::StringList(vec!["snp.xml".into()]))
            .with(BT_PARAM, ParameterValue::String("snp".into()))
    }

    #[test]
    fn test_defaults() {
        let config = WorkflowConfig::from_parameters(&base()).unwrap();
        assert_eq!(config.bt_short_timeout, 5.0);
        assert_eq!(config.bt_long_timeout, 6000.0);
        assert!((config.start_state_replacement_tolerance - 0.017453).abs() < 1e-5);
        assert_eq!(config.motion_group, "");
    }

    #[test]
    fn test_empty_tree_sources_checked_first() {
        let params = StaticParameters::new().with(BT_FILES_PARAM, ParameterValue::StringList(vec![]));
        assert_eq!(
            WorkflowConfig::from_parameters(&params),
            Err(ConfigurationError::EmptyTreeSources)
        );
    }

    #[test]
    fn test_missing_tree_name() {
        let params = base().with(BT_PARAM, ParameterValue::String(String::new()));
        assert_eq!(
            WorkflowConfig::from_parameters(&params),
            Err(ConfigurationError::MissingParameter("tree".to_string()))
        );
    }

    #[test]
    fn test_invalid_values() {
        let params = base().with(BT_SHORT_TIMEOUT_PARAM, ParameterValue::Integer(-1));
        assert!(matches!(
            WorkflowConfig::from_parameters(&params),
            Err(ConfigurationError::InvalidParameter { .. })
        ));

        let params = base().with(MOTION_GROUP_PARAM, ParameterValue::Bool(true));
        assert!(matches!(
            WorkflowConfig::from_parameters(&params),
            Err(ConfigurationError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_unrepresentable_timeout_rejected() {
        let params = base().with(BT_LONG_TIMEOUT_PARAM, ParameterValue::Double(1e300));
        match WorkflowConfig::from_parameters(&params) {
            Err(ConfigurationError::InvalidParameter { name, .. }) => assert_eq!(name, BT_LONG_TIMEOUT_PARAM),
            other => panic!("expected an invalid parameter, got {:?}", other),
        }

        let params = base().with(BT_SHORT_TIMEOUT_PARAM, ParameterValue::Double(1e6));
        assert!(WorkflowConfig::from_parameters(&params).is_ok());
    }

    #[test]
    fn test_from_json() {
        let params = StaticParameters::from_json_str(
            r#"{
                "motion_group": "manipulator",
                "bt_files": ["a.xml", "b.xml"],
                "tree": "snp",
                "bt_short_timeout": 2,
                "bt_long_timeout": 30.5
            }"#,
        )
        .unwrap();
        let config = WorkflowConfig::from_parameters(&params).unwrap();
        assert_eq!(config.motion_group, "manipulator");
        assert_eq!(config.bt_files.len(), 2);
        assert_eq!(config.timeouts(), RemoteTimeouts::from_secs(2.0, 30.5));
    }

    #[test]
    fn test_publish() {
        let params = base().with(TCP_FRAME_PARAM, ParameterValue::String("tool0".into()));
        let config = WorkflowConfig::from_parameters(&params).unwrap();
        let bb = Blackboard::new();
        config.publish(&bb);
        assert_eq!(bb.text(TCP_FRAME_PARAM).unwrap(), "tool0");
        assert!(bb.number(START_STATE_REPLACEMENT_TOLERANCE_PARAM).is_ok());
    }
}
