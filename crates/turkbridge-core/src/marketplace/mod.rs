pub mod answer;
pub mod in_memory;

pub use answer::{first_answer_value, parse_answer_payload};
pub use in_memory::InMemoryMarketplace;

use serde::{Deserialize, Serialize};

use crate::models::{Assignment, CoreError};

pub type MarketplaceResult<T> = Result<T, CoreError>;

/// Everything the marketplace needs to publish one question.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HitRequest {
    pub title: String,
    pub description: String,
    pub reward: f64,
    pub question: String,
    pub assignment_count: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PostedHit {
    pub remote_task_id: String,
    pub review_url: String,
}

/// Capabilities the synchronizer consumes from the crowd-work marketplace.
/// Transport, authentication and retry policy belong to the implementation.
pub trait Marketplace: Send + Sync {
    fn submit_task(&self, request: &HitRequest) -> MarketplaceResult<PostedHit>;

    /// Assignments in the marketplace's own order. An empty list means no
    /// worker has responded yet.
    fn list_assignments(&self, remote_task_id: &str) -> MarketplaceResult<Vec<Assignment>>;

    fn approve_assignment(&self, assignment_id: &str, note: &str) -> MarketplaceResult<()>;
}
