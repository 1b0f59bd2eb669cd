use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::marketplace::HitRequest;
use crate::models::{CoreError, CoreErrorKind};

/// Static settings for every task the synchronizer posts and settles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub title: String,
    pub description: String,
    pub reward: f64,
    pub assignment_count: u32,
    pub approval_note: String,
    pub lease_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            title: "Question From DICE".to_string(),
            description: "Question description".to_string(),
            reward: 0.01,
            assignment_count: 1,
            approval_note: "Well Done!".to_string(),
            lease_ttl_secs: 300,
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Config,
                format!("invalid sync configuration: {error}"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.reward.is_finite() || self.reward <= 0.0 {
            return Err(config_error(format!(
                "reward must be a positive amount, got {}",
                self.reward
            )));
        }
        if self.assignment_count == 0 {
            return Err(config_error("assignment_count must be at least 1"));
        }
        if self.title.trim().is_empty() {
            return Err(config_error("title must not be empty"));
        }
        if self.lease_ttl_secs == 0 {
            return Err(config_error("lease_ttl_secs must be greater than zero"));
        }
        Ok(())
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn hit_request(&self, question: &str) -> HitRequest {
        HitRequest {
            title: self.title.clone(),
            description: self.description.clone(),
            reward: self.reward,
            question: question.to_string(),
            assignment_count: self.assignment_count,
        }
    }
}

fn config_error(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::Config, message)
}
