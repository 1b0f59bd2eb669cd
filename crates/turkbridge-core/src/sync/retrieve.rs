use std::collections::BTreeSet;

use crate::marketplace::first_answer_value;
use crate::models::{
    AssignmentStatus, CoreError, CoreErrorKind, MarketplaceTaskRef, TaskId, TaskStatus,
};
use crate::sync::statements::{self, ASSIGNMENT_ID, MARKETPLACE_REF, TASK_ID};
use crate::sync::{SyncResult, TaskSynchronizer, keep_lease, task_ids};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RetrievePassReport {
    /// Tasks whose answer was recorded (`ANSWERED`) during this pass.
    pub captured: Vec<TaskId>,
    /// Tasks that reached `FINISHED` during this pass, including ones
    /// captured by an earlier pass.
    pub finished: BTreeSet<TaskId>,
    /// Tasks left `ANSWERED` because approval did not go through.
    pub awaiting_approval: Vec<TaskId>,
    /// Posted tasks with no submitted work yet.
    pub pending: Vec<TaskId>,
    /// Posted tasks skipped because of a marketplace or answer error.
    pub skipped: Vec<TaskId>,
}

#[derive(Clone, Debug)]
struct CapturedAnswer {
    task_id: TaskId,
    remote_task_id: String,
    assignment_id: String,
}

impl TaskSynchronizer {
    /// Two-phase retrieval: answers are committed as `ANSWERED` before any
    /// assignment is approved, and only approved tasks move to `FINISHED`.
    /// `ANSWERED` rows left by an earlier pass are approved first.
    pub fn run_retrieve_pass(&self) -> SyncResult<RetrievePassReport> {
        let lease = self.acquire_lease()?;
        let mut report = RetrievePassReport::default();

        let mut to_approve = self.load_unapproved()?;
        let posted = self.load_posted()?;

        let mut leased = true;
        let mut captured = Vec::new();
        let mut answer_updates = Vec::new();
        for (task_id, raw_ref) in posted {
            if !keep_lease(&lease, "retrieve") {
                leased = false;
                break;
            }
            match self.capture_answer(&task_id, raw_ref.as_deref()) {
                Ok(Some((answer, value))) => {
                    answer_updates.push(statements::mark_answered(
                        &answer.task_id,
                        &answer.assignment_id,
                        &value,
                        self.config.reward,
                    ));
                    captured.push(answer);
                }
                Ok(None) => report.pending.push(task_id),
                Err(error) => {
                    let error = error.attribute(&task_id);
                    tracing::warn!(
                        task_id = %task_id,
                        kind = ?error.kind,
                        message = %error.message,
                        "skipping posted task"
                    );
                    report.skipped.push(task_id);
                }
            }
        }

        if !answer_updates.is_empty() {
            let affected = self.store.execute_atomic(&answer_updates)?;
            for (answer, changed) in captured.into_iter().zip(affected) {
                if changed == 0 {
                    tracing::warn!(
                        task_id = %answer.task_id,
                        "task left POSTED before its answer was recorded"
                    );
                    continue;
                }
                report.captured.push(answer.task_id.clone());
                to_approve.push(answer);
            }
        }

        let mut approved = Vec::new();
        for answer in to_approve {
            if !leased || !keep_lease(&lease, "retrieve") {
                leased = false;
                report.awaiting_approval.push(answer.task_id);
                continue;
            }
            if self.approve(&answer) {
                approved.push(answer.task_id);
            } else {
                report.awaiting_approval.push(answer.task_id);
            }
        }

        if !approved.is_empty() {
            let finish_updates: Vec<_> =
                approved.iter().map(statements::mark_finished).collect();
            let affected = self.store.execute_atomic(&finish_updates)?;
            for (task_id, changed) in approved.into_iter().zip(affected) {
                if changed == 1 {
                    tracing::info!(task_id = %task_id, "task finished");
                    report.finished.insert(task_id);
                }
            }
        }

        tracing::info!(
            captured = report.captured.len(),
            finished = report.finished.len(),
            awaiting_approval = report.awaiting_approval.len(),
            pending = report.pending.len(),
            skipped = report.skipped.len(),
            "retrieve pass committed"
        );
        Ok(report)
    }

    /// Looks at the first assignment only; later assignments for the same
    /// task are never considered.
    fn capture_answer(
        &self,
        task_id: &TaskId,
        raw_ref: Option<&str>,
    ) -> SyncResult<Option<(CapturedAnswer, String)>> {
        let task_ref = parse_ref(task_id, raw_ref)?;
        let assignments = self
            .marketplace
            .list_assignments(&task_ref.remote_task_id)?;

        let Some(first) = assignments.into_iter().next() else {
            return Ok(None);
        };

        // An approved first assignment on a POSTED task was paid for without
        // being recorded locally; it is captured like a submitted one and
        // reconciled during approval.
        match first.status {
            AssignmentStatus::Submitted | AssignmentStatus::Approved => {}
            AssignmentStatus::Accepted | AssignmentStatus::Rejected => {
                tracing::debug!(
                    task_id = %task_id,
                    assignment_id = %first.assignment_id,
                    status = first.status.as_str(),
                    "first assignment is not ready"
                );
                return Ok(None);
            }
        }

        let value = first_answer_value(&first.answer_payload)?;
        tracing::info!(
            task_id = %task_id,
            assignment_id = %first.assignment_id,
            answer = %value,
            "captured answer"
        );

        Ok(Some((
            CapturedAnswer {
                task_id: task_id.clone(),
                remote_task_id: task_ref.remote_task_id,
                assignment_id: first.assignment_id,
            },
            value,
        )))
    }

    fn approve(&self, answer: &CapturedAnswer) -> bool {
        let error = match self
            .marketplace
            .approve_assignment(&answer.assignment_id, &self.config.approval_note)
        {
            Ok(()) => return true,
            Err(error) => error,
        };

        match self.is_already_approved(answer) {
            Ok(true) => {
                tracing::info!(
                    task_id = %answer.task_id,
                    assignment_id = %answer.assignment_id,
                    "assignment was already approved; reconciling"
                );
                true
            }
            Ok(false) => {
                tracing::warn!(
                    task_id = %answer.task_id,
                    assignment_id = %answer.assignment_id,
                    kind = ?error.kind,
                    message = %error.message,
                    "approval failed; task stays ANSWERED for the next pass"
                );
                false
            }
            Err(lookup_error) => {
                tracing::warn!(
                    task_id = %answer.task_id,
                    assignment_id = %answer.assignment_id,
                    kind = ?error.kind,
                    message = %error.message,
                    lookup_message = %lookup_error.message,
                    "approval failed and its outcome could not be confirmed"
                );
                false
            }
        }
    }

    fn is_already_approved(&self, answer: &CapturedAnswer) -> SyncResult<bool> {
        let assignments = self.marketplace.list_assignments(&answer.remote_task_id)?;
        Ok(assignments.iter().any(|assignment| {
            assignment.assignment_id == answer.assignment_id
                && assignment.status == AssignmentStatus::Approved
        }))
    }

    fn load_posted(&self) -> SyncResult<Vec<(TaskId, Option<String>)>> {
        let result = self.store.query(&statements::select_tasks_with_status(
            TaskStatus::Posted,
            &[TASK_ID, MARKETPLACE_REF],
        ))?;
        let ids = task_ids(&result)?;
        let refs = result.require_column(MARKETPLACE_REF)?;
        Ok(ids.into_iter().zip(refs.iter().cloned()).collect())
    }

    fn load_unapproved(&self) -> SyncResult<Vec<CapturedAnswer>> {
        let result = self.store.query(&statements::select_tasks_with_status(
            TaskStatus::Answered,
            &[TASK_ID, MARKETPLACE_REF, ASSIGNMENT_ID],
        ))?;
        let ids = task_ids(&result)?;
        let refs = result.require_column(MARKETPLACE_REF)?;
        let assignment_ids = result.require_column(ASSIGNMENT_ID)?;

        let mut unapproved = Vec::with_capacity(ids.len());
        for ((task_id, raw_ref), assignment_id) in ids.into_iter().zip(refs).zip(assignment_ids) {
            let task_ref = parse_ref(&task_id, raw_ref.as_deref())?;
            let assignment_id = assignment_id.clone().ok_or_else(|| {
                CoreError::for_task(
                    task_id.clone(),
                    CoreErrorKind::Query,
                    "ANSWERED task has no assignment_id",
                )
            })?;
            unapproved.push(CapturedAnswer {
                task_id,
                remote_task_id: task_ref.remote_task_id,
                assignment_id,
            });
        }
        Ok(unapproved)
    }
}

fn parse_ref(task_id: &TaskId, raw_ref: Option<&str>) -> SyncResult<MarketplaceTaskRef> {
    let raw_ref = raw_ref.ok_or_else(|| {
        CoreError::for_task(
            task_id.clone(),
            CoreErrorKind::InvalidInput,
            "posted task has no marketplace ref",
        )
    })?;
    MarketplaceTaskRef::parse(raw_ref).map_err(|error| error.attribute(task_id))
}
