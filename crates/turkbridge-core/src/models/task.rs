use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind};

const REF_SEPARATOR: char = '_';

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle of a question task. Ordering follows the only legal direction of
/// travel, so `a < b` means `b` is reachable from `a`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Init,
    Posted,
    Answered,
    Finished,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Posted => "POSTED",
            Self::Answered => "ANSWERED",
            Self::Finished => "FINISHED",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "INIT" => Ok(Self::Init),
            "POSTED" => Ok(Self::Posted),
            "ANSWERED" => Ok(Self::Answered),
            "FINISHED" => Ok(Self::Finished),
            other => Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("unknown task status '{other}'"),
            )),
        }
    }
}

/// Where a posted task lives on the marketplace. Persisted as
/// `<remote_task_id>_<review_url>`; remote ids never contain the separator,
/// so the first `_` splits the two halves.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MarketplaceTaskRef {
    pub remote_task_id: String,
    pub review_url: String,
}

impl MarketplaceTaskRef {
    pub fn encode(&self) -> String {
        format!("{}{REF_SEPARATOR}{}", self.remote_task_id, self.review_url)
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let (remote_task_id, review_url) = raw.split_once(REF_SEPARATOR).ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("marketplace ref '{raw}' is missing the '{REF_SEPARATOR}' separator"),
            )
        })?;
        if remote_task_id.trim().is_empty() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("marketplace ref '{raw}' has an empty remote task id"),
            ));
        }
        Ok(Self {
            remote_task_id: remote_task_id.to_string(),
            review_url: review_url.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub payload: String,
    pub status: TaskStatus,
    pub marketplace_ref: Option<MarketplaceTaskRef>,
    pub assignment_id: Option<String>,
    pub result: Option<String>,
    pub cost: Option<f64>,
    pub created_at: SystemTime,
    pub posted_at: Option<SystemTime>,
    pub answered_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}
