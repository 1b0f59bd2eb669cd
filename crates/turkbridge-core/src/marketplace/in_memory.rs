use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use crate::marketplace::{HitRequest, Marketplace, MarketplaceResult, PostedHit};
use crate::models::{Assignment, AssignmentStatus, CoreError, CoreErrorKind};

const DEFAULT_PREVIEW_BASE_URL: &str = "https://workersandbox.example/preview";

/// Marketplace held entirely in memory. Workers are simulated by adding
/// assignments by hand, and individual calls can be made to fail.
pub struct InMemoryMarketplace {
    state: Mutex<MarketplaceState>,
}

#[derive(Default)]
struct MarketplaceState {
    preview_base_url: String,
    next_hit_number: u64,
    hits: BTreeMap<String, HostedHit>,
    assignment_owners: BTreeMap<String, String>,
    submissions: Vec<HitRequest>,
    approvals: Vec<(String, String)>,
    rejected_questions: BTreeSet<String>,
    failing_listings: BTreeSet<String>,
    failing_approvals: BTreeSet<String>,
    lost_approval_responses: BTreeSet<String>,
}

#[derive(Default)]
struct HostedHit {
    request: Option<HitRequest>,
    assignments: Vec<Assignment>,
}

impl Default for InMemoryMarketplace {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMarketplace {
    pub fn new() -> Self {
        Self::with_preview_base_url(DEFAULT_PREVIEW_BASE_URL)
    }

    /// Remote ids are `H1`, `H2`, ... and review URLs are
    /// `<preview_base_url>/<remote id>`.
    pub fn with_preview_base_url(preview_base_url: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MarketplaceState {
                preview_base_url: preview_base_url.into(),
                next_hit_number: 1,
                ..MarketplaceState::default()
            }),
        }
    }

    /// Registers a HIT that was created outside this marketplace instance.
    pub fn seed_hit(&self, remote_task_id: &str) -> MarketplaceResult<()> {
        let mut state = self.lock_state()?;
        state.hits.entry(remote_task_id.to_string()).or_default();
        Ok(())
    }

    pub fn add_assignment(
        &self,
        remote_task_id: &str,
        assignment: Assignment,
    ) -> MarketplaceResult<()> {
        let mut state = self.lock_state()?;
        let Some(hit) = state.hits.get_mut(remote_task_id) else {
            return Err(unknown_hit(remote_task_id));
        };
        let assignment_id = assignment.assignment_id.clone();
        hit.assignments.push(assignment);
        state
            .assignment_owners
            .insert(assignment_id, remote_task_id.to_string());
        Ok(())
    }

    pub fn reject_submissions_of(&self, question: &str) -> MarketplaceResult<()> {
        self.lock_state()?
            .rejected_questions
            .insert(question.to_string());
        Ok(())
    }

    pub fn fail_listings_for(&self, remote_task_id: &str) -> MarketplaceResult<()> {
        self.lock_state()?
            .failing_listings
            .insert(remote_task_id.to_string());
        Ok(())
    }

    pub fn fail_approvals_for(&self, assignment_id: &str) -> MarketplaceResult<()> {
        self.lock_state()?
            .failing_approvals
            .insert(assignment_id.to_string());
        Ok(())
    }

    /// The approval is applied, but the caller sees an error, as if the
    /// response was lost in transit.
    pub fn lose_approval_responses_for(&self, assignment_id: &str) -> MarketplaceResult<()> {
        self.lock_state()?
            .lost_approval_responses
            .insert(assignment_id.to_string());
        Ok(())
    }

    pub fn clear_failures(&self) -> MarketplaceResult<()> {
        let mut state = self.lock_state()?;
        state.rejected_questions.clear();
        state.failing_listings.clear();
        state.failing_approvals.clear();
        state.lost_approval_responses.clear();
        Ok(())
    }

    pub fn submissions(&self) -> MarketplaceResult<Vec<HitRequest>> {
        Ok(self.lock_state()?.submissions.clone())
    }

    pub fn hit_request(&self, remote_task_id: &str) -> MarketplaceResult<Option<HitRequest>> {
        Ok(self
            .lock_state()?
            .hits
            .get(remote_task_id)
            .and_then(|hit| hit.request.clone()))
    }

    /// `(assignment_id, note)` for every approval that reached the marketplace.
    pub fn approvals(&self) -> MarketplaceResult<Vec<(String, String)>> {
        Ok(self.lock_state()?.approvals.clone())
    }

    pub fn assignment_status(&self, assignment_id: &str) -> MarketplaceResult<AssignmentStatus> {
        let state = self.lock_state()?;
        state
            .find_assignment(assignment_id)
            .map(|assignment| assignment.status)
            .ok_or_else(|| unknown_assignment(assignment_id))
    }

    fn lock_state(&self) -> MarketplaceResult<MutexGuard<'_, MarketplaceState>> {
        self.state.lock().map_err(|_| {
            CoreError::new(CoreErrorKind::Internal, "in-memory marketplace mutex poisoned")
        })
    }
}

impl MarketplaceState {
    fn find_assignment(&self, assignment_id: &str) -> Option<&Assignment> {
        let owner = self.assignment_owners.get(assignment_id)?;
        self.hits
            .get(owner)?
            .assignments
            .iter()
            .find(|assignment| assignment.assignment_id == assignment_id)
    }

    fn find_assignment_mut(&mut self, assignment_id: &str) -> Option<&mut Assignment> {
        let owner = self.assignment_owners.get(assignment_id)?.clone();
        self.hits
            .get_mut(&owner)?
            .assignments
            .iter_mut()
            .find(|assignment| assignment.assignment_id == assignment_id)
    }
}

impl Marketplace for InMemoryMarketplace {
    fn submit_task(&self, request: &HitRequest) -> MarketplaceResult<PostedHit> {
        let mut state = self.lock_state()?;
        if state.rejected_questions.contains(&request.question) {
            return Err(CoreError::new(
                CoreErrorKind::Submission,
                "marketplace rejected the question definition",
            ));
        }

        let remote_task_id = format!("H{}", state.next_hit_number);
        state.next_hit_number = state.next_hit_number.saturating_add(1);
        let review_url = format!(
            "{}/{remote_task_id}",
            state.preview_base_url.trim_end_matches('/')
        );

        state.submissions.push(request.clone());
        state.hits.insert(
            remote_task_id.clone(),
            HostedHit {
                request: Some(request.clone()),
                assignments: Vec::new(),
            },
        );

        Ok(PostedHit {
            remote_task_id,
            review_url,
        })
    }

    fn list_assignments(&self, remote_task_id: &str) -> MarketplaceResult<Vec<Assignment>> {
        let state = self.lock_state()?;
        if state.failing_listings.contains(remote_task_id) {
            return Err(CoreError::new(
                CoreErrorKind::Marketplace,
                format!("listing assignments for HIT '{remote_task_id}' timed out"),
            ));
        }
        state
            .hits
            .get(remote_task_id)
            .map(|hit| hit.assignments.clone())
            .ok_or_else(|| unknown_hit(remote_task_id))
    }

    fn approve_assignment(&self, assignment_id: &str, note: &str) -> MarketplaceResult<()> {
        let mut state = self.lock_state()?;
        if state.failing_approvals.contains(assignment_id) {
            return Err(CoreError::new(
                CoreErrorKind::Marketplace,
                format!("approval of assignment '{assignment_id}' failed"),
            ));
        }

        let assignment = state
            .find_assignment_mut(assignment_id)
            .ok_or_else(|| unknown_assignment(assignment_id))?;
        if assignment.status != AssignmentStatus::Submitted {
            return Err(CoreError::new(
                CoreErrorKind::Marketplace,
                format!(
                    "assignment '{assignment_id}' is {} and cannot be approved",
                    assignment.status.as_str()
                ),
            ));
        }
        assignment.status = AssignmentStatus::Approved;
        state
            .approvals
            .push((assignment_id.to_string(), note.to_string()));

        if state.lost_approval_responses.contains(assignment_id) {
            return Err(CoreError::new(
                CoreErrorKind::Marketplace,
                format!("connection reset while approving assignment '{assignment_id}'"),
            ));
        }
        Ok(())
    }
}

fn unknown_hit(remote_task_id: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::Marketplace,
        format!("unknown HIT '{remote_task_id}'"),
    )
}

fn unknown_assignment(assignment_id: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::Marketplace,
        format!("unknown assignment '{assignment_id}'"),
    )
}
