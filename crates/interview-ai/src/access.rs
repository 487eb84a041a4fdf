//! Caller roles and the single capability check used by every entry point.

use std::fmt;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Recruiter,
    Candidate,
    Worker,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Recruiter => "recruiter",
            Role::Candidate => "candidate",
            Role::Worker => "worker",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "recruiter" => Some(Role::Recruiter),
            "candidate" => Some(Role::Candidate),
            "worker" => Some(Role::Worker),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Operations guarded by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SubmitAnswer,
    ViewQueue,
    ProcessTask,
    RequeueTask,
    ManageSessions,
    ViewSession,
    RecomputeScore,
}

impl Capability {
    pub const fn label(self) -> &'static str {
        match self {
            Capability::SubmitAnswer => "submit_answer",
            Capability::ViewQueue => "view_queue",
            Capability::ProcessTask => "process_task",
            Capability::RequeueTask => "requeue_task",
            Capability::ManageSessions => "manage_sessions",
            Capability::ViewSession => "view_session",
            Capability::RecomputeScore => "recompute_score",
        }
    }
}

pub fn permits(role: Role, capability: Capability) -> bool {
    use Capability::*;
    match role {
        Role::Admin => !matches!(capability, ProcessTask),
        Role::Recruiter => matches!(capability, ManageSessions | ViewSession | RecomputeScore),
        Role::Candidate => matches!(capability, SubmitAnswer | ViewSession),
        Role::Worker => matches!(capability, ViewQueue | ProcessTask),
    }
}

/// Authenticated caller as asserted by the upstream gateway headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub role: Role,
    pub actor: Option<String>,
}

impl Principal {
    pub fn new(role: Role) -> Self {
        Self { role, actor: None }
    }

    pub fn with_actor(role: Role, actor: impl Into<String>) -> Self {
        Self {
            role,
            actor: Some(actor.into()),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AccessDenied> {
        let raw = headers
            .get(ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(AccessDenied::Unauthenticated)?;
        let role = Role::parse(raw).ok_or(AccessDenied::Unauthenticated)?;
        let actor = headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Ok(Self { role, actor })
    }

    /// Label written to the task audit trail, e.g. `worker:stt-1`.
    pub fn audit_label(&self) -> String {
        match &self.actor {
            Some(actor) => format!("{}:{}", self.role, actor),
            None => self.role.to_string(),
        }
    }

    pub fn require(&self, capability: Capability) -> Result<(), AccessDenied> {
        if permits(self.role, capability) {
            Ok(())
        } else {
            Err(AccessDenied::Forbidden {
                role: self.role,
                capability,
            })
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AccessDenied;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Principal::from_headers(&parts.headers)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    #[error("missing or unknown x-actor-role header")]
    Unauthenticated,
    #[error("role {role} may not {}", .capability.label())]
    Forbidden { role: Role, capability: Capability },
}

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        let status = match self {
            AccessDenied::Unauthenticated => StatusCode::UNAUTHORIZED,
            AccessDenied::Forbidden { .. } => StatusCode::FORBIDDEN,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn workers_process_but_never_requeue() {
        assert!(permits(Role::Worker, Capability::ProcessTask));
        assert!(permits(Role::Worker, Capability::ViewQueue));
        assert!(!permits(Role::Worker, Capability::RequeueTask));
        assert!(!permits(Role::Worker, Capability::SubmitAnswer));
    }

    #[test]
    fn admin_is_the_only_role_allowed_to_requeue() {
        for role in [Role::Recruiter, Role::Candidate, Role::Worker] {
            assert!(!permits(role, Capability::RequeueTask), "{role}");
        }
        assert!(permits(Role::Admin, Capability::RequeueTask));
        assert!(!permits(Role::Admin, Capability::ProcessTask));
    }

    #[test]
    fn principal_reads_role_and_actor_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ROLE_HEADER, HeaderValue::from_static("Worker"));
        headers.insert(ACTOR_HEADER, HeaderValue::from_static("stt-1"));

        let principal = Principal::from_headers(&headers).expect("principal parses");
        assert_eq!(principal.role, Role::Worker);
        assert_eq!(principal.audit_label(), "worker:stt-1");
    }

    #[test]
    fn unknown_role_is_unauthenticated() {
        let mut headers = HeaderMap::new();
        headers.insert(ROLE_HEADER, HeaderValue::from_static("root"));
        assert_eq!(
            Principal::from_headers(&headers),
            Err(AccessDenied::Unauthenticated)
        );
        assert_eq!(
            Principal::from_headers(&HeaderMap::new()),
            Err(AccessDenied::Unauthenticated)
        );
    }
}
