use crate::marketplace::PostedHit;
use crate::models::{MarketplaceTaskRef, TaskId, TaskStatus};
use crate::sync::statements::{self, PAYLOAD, TASK_ID};
use crate::sync::{SyncResult, TaskSynchronizer, keep_lease, task_ids};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PostPassReport {
    /// Tasks now `POSTED`.
    pub posted: Vec<TaskId>,
    /// Tasks whose submission failed; they stay `INIT` for the next pass.
    pub failed: Vec<TaskId>,
}

impl PostPassReport {
    pub fn committed(&self) -> bool {
        !self.posted.is_empty()
    }
}

impl TaskSynchronizer {
    pub fn run_post_pass(&self) -> SyncResult<PostPassReport> {
        let lease = self.acquire_lease()?;
        let mut report = PostPassReport::default();

        let unposted = self.load_unposted()?;
        if unposted.is_empty() {
            tracing::debug!("no INIT tasks to post");
            return Ok(report);
        }

        let mut batch: Vec<(TaskId, MarketplaceTaskRef)> = Vec::new();
        for (task_id, payload) in unposted {
            if !keep_lease(&lease, "post") {
                break;
            }
            let request = self.config.hit_request(&payload);
            match self.marketplace.submit_task(&request) {
                Ok(PostedHit {
                    remote_task_id,
                    review_url,
                }) => {
                    tracing::info!(
                        task_id = %task_id,
                        remote_task_id = %remote_task_id,
                        review_url = %review_url,
                        "submitted task to marketplace"
                    );
                    batch.push((
                        task_id,
                        MarketplaceTaskRef {
                            remote_task_id,
                            review_url,
                        },
                    ));
                }
                Err(error) => {
                    tracing::warn!(
                        task_id = %task_id,
                        kind = ?error.kind,
                        message = %error.message,
                        payload = %payload,
                        "failed to submit task; it stays INIT for the next pass"
                    );
                    report.failed.push(task_id);
                }
            }
        }

        if batch.is_empty() {
            return Ok(report);
        }

        let updates: Vec<_> = batch
            .iter()
            .map(|(task_id, task_ref)| statements::mark_posted(task_id, task_ref))
            .collect();
        let affected = self.store.execute_atomic(&updates)?;

        for ((task_id, task_ref), changed) in batch.into_iter().zip(affected) {
            if changed == 0 {
                tracing::warn!(
                    task_id = %task_id,
                    remote_task_id = %task_ref.remote_task_id,
                    "task left INIT before its posting was recorded"
                );
                continue;
            }
            report.posted.push(task_id);
        }

        tracing::info!(
            posted = report.posted.len(),
            failed = report.failed.len(),
            "post pass committed"
        );
        Ok(report)
    }

    fn load_unposted(&self) -> SyncResult<Vec<(TaskId, String)>> {
        let result = self.store.query(&statements::select_tasks_with_status(
            TaskStatus::Init,
            &[TASK_ID, PAYLOAD],
        ))?;
        let ids = task_ids(&result)?;
        let payloads = result.require_column(PAYLOAD)?;

        Ok(ids
            .into_iter()
            .zip(payloads)
            .map(|(task_id, payload)| (task_id, payload.clone().unwrap_or_default()))
            .collect())
    }
}
