use serde::{Deserialize, Serialize};
use turkbridge_core::marketplace::{HitRequest, Marketplace, MarketplaceResult, PostedHit};
use turkbridge_core::models::{Assignment, AssignmentStatus, CoreError, CoreErrorKind};

use crate::config::MarketplaceConfig;

/// Talks to a JSON gateway in front of the crowd-work marketplace.
///
/// - `POST {endpoint}/tasks` creates a HIT
/// - `GET {endpoint}/tasks/{hit_id}/assignments` lists its assignments
/// - `POST {endpoint}/assignments/{assignment_id}/approve` approves one
pub struct HttpMarketplace {
    agent: ureq::Agent,
    endpoint: String,
    preview_base_url: String,
    api_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateTaskBody<'a> {
    title: &'a str,
    description: &'a str,
    reward: String,
    question: &'a str,
    max_assignments: u32,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    hit_id: String,
    hit_type_id: String,
}

#[derive(Debug, Deserialize)]
struct WireAssignment {
    assignment_id: String,
    status: String,
    #[serde(default)]
    answer: String,
}

#[derive(Debug, Serialize)]
struct ApproveBody<'a> {
    feedback: &'a str,
}

impl HttpMarketplace {
    pub fn new(config: &MarketplaceConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout()).build();
        Self {
            agent,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            preview_base_url: config.preview_base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        }
    }

    fn tasks_url(&self) -> String {
        format!("{}/tasks", self.endpoint)
    }

    fn assignments_url(&self, remote_task_id: &str) -> String {
        format!(
            "{}/tasks/{}/assignments",
            self.endpoint,
            urlencoding::encode(remote_task_id)
        )
    }

    fn approve_url(&self, assignment_id: &str) -> String {
        format!(
            "{}/assignments/{}/approve",
            self.endpoint,
            urlencoding::encode(assignment_id)
        )
    }

    fn review_url(&self, hit_type_id: &str) -> String {
        format!(
            "{}/mturk/preview?groupId={hit_type_id}",
            self.preview_base_url
        )
    }

    fn authorized(&self, request: ureq::Request) -> ureq::Request {
        match &self.api_token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }
}

impl Marketplace for HttpMarketplace {
    fn submit_task(&self, request: &HitRequest) -> MarketplaceResult<PostedHit> {
        let body = CreateTaskBody {
            title: &request.title,
            description: &request.description,
            reward: format_reward(request.reward),
            question: &request.question,
            max_assignments: request.assignment_count,
        };
        let response = self
            .authorized(self.agent.post(&self.tasks_url()))
            .send_json(&body)
            .map_err(|error| transport_error(CoreErrorKind::Submission, "create task", error))?;
        let created: CreatedTask = response
            .into_json()
            .map_err(|error| decode_error(CoreErrorKind::Submission, "create task", error))?;

        if created.hit_id.is_empty() || created.hit_id.contains('_') {
            return Err(CoreError::new(
                CoreErrorKind::Submission,
                format!("gateway returned unusable HIT id '{}'", created.hit_id),
            ));
        }
        Ok(PostedHit {
            review_url: self.review_url(&created.hit_type_id),
            remote_task_id: created.hit_id,
        })
    }

    fn list_assignments(&self, remote_task_id: &str) -> MarketplaceResult<Vec<Assignment>> {
        let response = self
            .authorized(self.agent.get(&self.assignments_url(remote_task_id)))
            .call()
            .map_err(|error| {
                transport_error(CoreErrorKind::Marketplace, "list assignments", error)
            })?;
        let wire: Vec<WireAssignment> = response.into_json().map_err(|error| {
            decode_error(CoreErrorKind::Marketplace, "list assignments", error)
        })?;
        wire.into_iter().map(assignment_from_wire).collect()
    }

    fn approve_assignment(&self, assignment_id: &str, note: &str) -> MarketplaceResult<()> {
        self.authorized(self.agent.post(&self.approve_url(assignment_id)))
            .send_json(ApproveBody { feedback: note })
            .map_err(|error| {
                transport_error(CoreErrorKind::Marketplace, "approve assignment", error)
            })?;
        Ok(())
    }
}

fn assignment_from_wire(wire: WireAssignment) -> MarketplaceResult<Assignment> {
    let status = wire.status.parse::<AssignmentStatus>().map_err(|()| {
        CoreError::new(
            CoreErrorKind::Marketplace,
            format!(
                "assignment '{}' has unknown status '{}'",
                wire.assignment_id, wire.status
            ),
        )
    })?;
    Ok(Assignment {
        assignment_id: wire.assignment_id,
        status,
        answer_payload: wire.answer,
    })
}

/// Rewards travel as decimal strings with cent precision.
fn format_reward(reward: f64) -> String {
    format!("{reward:.2}")
}

fn transport_error(kind: CoreErrorKind, operation: &str, error: ureq::Error) -> CoreError {
    let message = match error {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            format!("{operation} failed with HTTP {code}: {}", body.trim())
        }
        ureq::Error::Transport(transport) => format!("{operation} failed: {transport}"),
    };
    CoreError::new(kind, message)
}

fn decode_error(kind: CoreErrorKind, operation: &str, error: std::io::Error) -> CoreError {
    CoreError::new(
        kind,
        format!("{operation} returned an unreadable response: {error}"),
    )
}
