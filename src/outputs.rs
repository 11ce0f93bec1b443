//! Parsed `terraform output -json`.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

pub const JENKINS_ROLE_ARN: &str = "jenkins_iam_role_arn";
pub const ECR_REPOSITORY_URL: &str = "ecr_repository_url";

#[derive(Debug, Clone, Deserialize)]
pub struct OutputValue {
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TerraformOutputs {
    values: BTreeMap<String, OutputValue>,
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("parsing terraform outputs: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("terraform output '{0}' is missing")]
    Missing(String),
    #[error("terraform output '{0}' is not a string")]
    NotAString(String),
}

impl TerraformOutputs {
    pub fn parse(json: &str) -> Result<Self, OutputError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.values.get(name)
    }

    /// The `value` of output `name`, which must be a JSON string.
    pub fn string(&self, name: &str) -> Result<&str, OutputError> {
        let output = self
            .get(name)
            .ok_or_else(|| OutputError::Missing(name.to_string()))?;
        output
            .value
            .as_str()
            .ok_or_else(|| OutputError::NotAString(name.to_string()))
    }
}
