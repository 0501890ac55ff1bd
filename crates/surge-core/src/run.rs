use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AuthSpec;
use crate::error::{CoreError, CoreResult};
use crate::ids::RunId;

/// Lifecycle state of a run. Transitions are monotonic:
/// `Running -> (Completed | Stopped)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The run is executing.
    Running,
    /// The run reached its deadline or was ended by the circuit breaker.
    Completed,
    /// The run was ended by an external stop request.
    Stopped,
}

impl RunStatus {
    /// Returns the canonical lowercase string stored in SQLite.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }

}

impl FromStr for RunStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            _ => Err(()),
        }
    }
}

/// HTTP method issued by virtual users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl RequestMethod {
    /// Canonical uppercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Whether a request body may be attached. GET and HEAD requests are
    /// refused a body at admission.
    #[must_use]
    pub const fn allows_body(&self) -> bool {
        !matches!(self, Self::Get | Self::Head)
    }

    /// Whether a missing `Content-Type` defaults to `application/json` when
    /// a body is present.
    #[must_use]
    pub const fn defaults_json_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl FromStr for RequestMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            _ => Err(()),
        }
    }
}

fn default_requests_per_user() -> u32 {
    RunPlan::DEFAULT_REQUESTS_PER_USER
}

fn default_mask_target() -> bool {
    true
}

/// Parameters accepted when starting a run.
///
/// `validate` clamps the soft knobs and rejects everything outside the hard
/// envelopes before a descriptor is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    /// Raw target as supplied by the caller; replaced with the normalized
    /// URL once host validation has passed.
    pub target: String,
    /// Planned virtual-user population.
    pub users: u32,
    /// Ramp duration in seconds (0 starts everyone at once).
    #[serde(default, alias = "ramp_up_sec")]
    pub ramp_sec: u32,
    /// Test duration in seconds.
    #[serde(alias = "duration")]
    pub duration_sec: u32,
    #[serde(default)]
    pub method: RequestMethod,
    #[serde(default)]
    pub body: Option<String>,
    /// Static headers applied verbatim to every request.
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// Per-user request start rate M (requests/second).
    #[serde(
        default = "default_requests_per_user",
        alias = "max_concurrent_requests"
    )]
    pub requests_per_user: u32,
    /// Error-rate threshold in percent; 0 disables the circuit breaker.
    #[serde(default)]
    pub error_threshold: f64,
    #[serde(default)]
    pub auth: Option<AuthSpec>,
    /// Advisory flag asking listings to mask the target. Stored verbatim;
    /// the engine never redacts.
    #[serde(default = "default_mask_target")]
    pub mask_target: bool,
}

impl RunPlan {
    pub const MIN_USERS: u32 = 1;
    pub const MAX_USERS: u32 = 1_000;
    pub const MIN_DURATION_SEC: u32 = 1;
    pub const MAX_DURATION_SEC: u32 = 300;
    pub const MAX_RAMP_SEC: u32 = 300;
    pub const MIN_REQUESTS_PER_USER: u32 = 1;
    pub const MAX_REQUESTS_PER_USER: u32 = 100;
    pub const DEFAULT_REQUESTS_PER_USER: u32 = 10;

    /// Validates the hard parameter envelopes and silently clamps the soft
    /// ones (request rate, error threshold).
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidParameter` when users, duration, ramp, or
    /// the method/body combination is out of range.
    pub fn validate(&mut self) -> CoreResult<()> {
        if self.users < Self::MIN_USERS || self.users > Self::MAX_USERS {
            return Err(CoreError::invalid_parameter(format!(
                "users must be between {} and {}",
                Self::MIN_USERS,
                Self::MAX_USERS
            )));
        }

        if self.duration_sec < Self::MIN_DURATION_SEC || self.duration_sec > Self::MAX_DURATION_SEC
        {
            return Err(CoreError::invalid_parameter(format!(
                "duration must be between {} and {} seconds",
                Self::MIN_DURATION_SEC,
                Self::MAX_DURATION_SEC
            )));
        }

        if self.ramp_sec > Self::MAX_RAMP_SEC {
            return Err(CoreError::invalid_parameter(format!(
                "ramp must be at most {} seconds",
                Self::MAX_RAMP_SEC
            )));
        }

        if self.ramp_sec > self.duration_sec {
            return Err(CoreError::invalid_parameter(
                "ramp cannot exceed the test duration",
            ));
        }

        if self.body.is_some() && !self.method.allows_body() {
            return Err(CoreError::invalid_parameter(format!(
                "method {} does not accept a request body",
                self.method.as_str()
            )));
        }

        self.requests_per_user = self
            .requests_per_user
            .clamp(Self::MIN_REQUESTS_PER_USER, Self::MAX_REQUESTS_PER_USER);

        if !self.error_threshold.is_finite() {
            self.error_threshold = 0.0;
        }
        self.error_threshold = self.error_threshold.clamp(0.0, 100.0);

        Ok(())
    }
}

/// Persisted record of a run: the admitted plan plus lifecycle state and
/// aggregate totals written at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDescriptor {
    /// Internal sequential key assigned on durable insert (0 until then).
    pub run_key: i64,
    pub run_id: RunId,
    /// Normalized target URL.
    pub target: String,
    pub mask_target: bool,
    pub users: u32,
    pub ramp_sec: u32,
    pub duration_sec: u32,
    pub method: RequestMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    pub requests_per_user: u32,
    pub error_threshold: f64,
    pub status: RunStatus,
    pub stopped_by_circuit: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub rps: f64,
}

impl RunDescriptor {
    /// Builds the initial descriptor for a validated plan. Aggregate totals
    /// stay zero until finalization.
    #[must_use]
    pub fn from_plan(plan: &RunPlan, run_id: RunId, started_at: DateTime<Utc>) -> Self {
        Self {
            run_key: 0,
            run_id,
            target: plan.target.clone(),
            mask_target: plan.mask_target,
            users: plan.users,
            ramp_sec: plan.ramp_sec,
            duration_sec: plan.duration_sec,
            method: plan.method,
            body: plan.body.clone(),
            headers: plan.headers.clone(),
            requests_per_user: plan.requests_per_user,
            error_threshold: plan.error_threshold,
            status: RunStatus::Running,
            stopped_by_circuit: false,
            started_at,
            completed_at: None,
            total_requests: 0,
            success_count: 0,
            error_count: 0,
            avg_latency_ms: 0.0,
            min_latency_ms: 0.0,
            max_latency_ms: 0.0,
            rps: 0.0,
        }
    }

    /// Percentage of failed requests, 0 when nothing has completed yet.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        100.0 * self.error_count as f64 / self.total_requests as f64
    }

    /// Pacing period between request starts for one virtual user.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(1_000 / u64::from(self.requests_per_user.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(users: u32, ramp: u32, duration: u32) -> RunPlan {
        RunPlan {
            target: "example.com".to_string(),
            users,
            ramp_sec: ramp,
            duration_sec: duration,
            method: RequestMethod::Get,
            body: None,
            headers: None,
            requests_per_user: RunPlan::DEFAULT_REQUESTS_PER_USER,
            error_threshold: 0.0,
            auth: None,
            mask_target: true,
        }
    }

    #[test]
    fn accepts_plan_within_envelopes() {
        assert!(plan(5, 0, 2).validate().is_ok());
        assert!(plan(1_000, 300, 300).validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_users_and_duration() {
        assert!(plan(0, 0, 10).validate().is_err());
        assert!(plan(2_000, 0, 10).validate().is_err());
        assert!(plan(5, 0, 0).validate().is_err());
        assert!(plan(5, 0, 301).validate().is_err());
    }

    #[test]
    fn rejects_ramp_longer_than_duration() {
        assert!(plan(5, 11, 10).validate().is_err());
        assert!(plan(5, 10, 10).validate().is_ok());
    }

    #[test]
    fn rejects_body_on_get_and_head() {
        let mut p = plan(5, 0, 10);
        p.body = Some("{}".to_string());
        assert!(p.validate().is_err());

        p.method = RequestMethod::Head;
        assert!(p.validate().is_err());

        p.method = RequestMethod::Post;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn clamps_request_rate_and_threshold() {
        let mut p = plan(5, 0, 10);
        p.requests_per_user = 0;
        p.error_threshold = 250.0;
        p.validate().expect("valid plan");
        assert_eq!(p.requests_per_user, 1);
        assert_eq!(p.error_threshold, 100.0);

        p.requests_per_user = 500;
        p.error_threshold = f64::NAN;
        p.validate().expect("valid plan");
        assert_eq!(p.requests_per_user, 100);
        assert_eq!(p.error_threshold, 0.0);
    }

    #[test]
    fn tick_interval_follows_request_rate() {
        let mut p = plan(1, 0, 10);
        p.requests_per_user = 10;
        let mut run = RunDescriptor::from_plan(&p, RunId::new(), Utc::now());
        assert_eq!(run.tick_interval(), Duration::from_millis(100));
        run.requests_per_user = 1;
        assert_eq!(run.tick_interval(), Duration::from_millis(1_000));
    }

    #[test]
    fn plan_aliases_are_accepted() {
        let p: RunPlan = serde_json::from_str(
            r#"{"target":"example.com","users":3,"ramp_up_sec":1,"duration":5,"max_concurrent_requests":20}"#,
        )
        .expect("deserialize");
        assert_eq!(p.ramp_sec, 1);
        assert_eq!(p.duration_sec, 5);
        assert_eq!(p.requests_per_user, 20);
    }
}
