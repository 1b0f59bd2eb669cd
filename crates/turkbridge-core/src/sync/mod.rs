//! Drives question tasks through `INIT -> POSTED -> ANSWERED -> FINISHED`
//! against a [`Marketplace`], one sequential pass at a time.

pub mod lease;
mod post;
mod retrieve;
pub(crate) mod statements;

pub use lease::{SYNC_LEASE_NAME, SyncLease};
pub use post::PostPassReport;
pub use retrieve::RetrievePassReport;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::marketplace::Marketplace;
use crate::models::{CoreError, CoreErrorKind, TaskId};
use crate::persistence::{ColumnarResult, TabularStore};

pub type SyncResult<T> = Result<T, CoreError>;

pub struct TaskSynchronizer {
    store: Arc<dyn TabularStore>,
    marketplace: Arc<dyn Marketplace>,
    config: SyncConfig,
    holder: String,
}

impl TaskSynchronizer {
    pub fn new(
        store: Arc<dyn TabularStore>,
        marketplace: Arc<dyn Marketplace>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            marketplace,
            config,
            holder: default_holder_id(),
        }
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Posts every `INIT` task. Returns `true` only when at least one task was
    /// submitted and the batch commit succeeded; a pass with nothing to post
    /// returns `false`.
    pub fn post_questions(&self) -> bool {
        match self.run_post_pass() {
            Ok(report) => report.committed(),
            Err(error) => {
                log_pass_failure("post", &error);
                false
            }
        }
    }

    /// Settles answered tasks and returns the ids that reached `FINISHED` in
    /// this pass. Any pass-level failure yields an empty set.
    pub fn retrieve_answers(&self) -> BTreeSet<TaskId> {
        match self.run_retrieve_pass() {
            Ok(report) => report.finished,
            Err(error) => {
                log_pass_failure("retrieve", &error);
                BTreeSet::new()
            }
        }
    }

    fn acquire_lease(&self) -> SyncResult<SyncLease<'_>> {
        SyncLease::acquire(self.store.as_ref(), self.holder.as_str(), self.config.lease_ttl())
    }
}

/// Renews `lease` ahead of a marketplace call. `false` means the pass must
/// stop issuing calls and only commit what it already has.
fn keep_lease(lease: &SyncLease<'_>, pass: &str) -> bool {
    match lease.renew() {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(
                pass,
                holder = %lease.holder(),
                kind = ?error.kind,
                message = %error.message,
                "lost sync lease; ending pass early"
            );
            false
        }
    }
}

fn log_pass_failure(pass: &str, error: &CoreError) {
    if error.kind == CoreErrorKind::LeaseHeld {
        tracing::info!(pass, message = %error.message, "skipping sync pass");
    } else {
        tracing::error!(
            pass,
            kind = ?error.kind,
            message = %error.message,
            "sync pass failed"
        );
    }
}

fn default_holder_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Reads the `task_id` column; a NULL id means the row cannot be addressed
/// and fails the whole read.
fn task_ids(result: &ColumnarResult) -> SyncResult<Vec<TaskId>> {
    result
        .require_column(statements::TASK_ID)?
        .iter()
        .map(|cell| {
            cell.as_deref().map(TaskId::from).ok_or_else(|| {
                CoreError::new(CoreErrorKind::Query, "task row has a NULL task_id")
            })
        })
        .collect()
}
