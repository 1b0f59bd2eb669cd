pub mod assignment;
pub mod error;
pub mod task;

pub use assignment::{AnswerField, Assignment, AssignmentStatus};
pub use error::{CoreError, CoreErrorKind};
pub use task::{MarketplaceTaskRef, TaskId, TaskRecord, TaskStatus};
