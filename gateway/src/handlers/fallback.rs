//! Request bodies shared by the fallback-backed endpoints.
//!
//! Every endpoint takes an ordered list of attempts plus the plan options:
//!
//! ```json
//! {
//!   "requests": [{"provider_id": "openai", "model": "gpt-4o-mini", "...": "..."}],
//!   "strategy": "sequential",
//!   "timeout_per_request": 30,
//!   "deadline_secs": 60
//! }
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::config::FallbackSettings;
use crate::core::fallback::{AttemptRequest, FallbackError, FallbackPlan, Strategy};
use crate::core::provider::{ChatRequest, SpeakRequest};
use crate::errors::app_error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct PlanBody<R> {
    pub requests: Vec<R>,
    #[serde(default)]
    pub strategy: Strategy,
    /// Seconds; defaults to `fallback.default_timeout_per_request_secs`.
    #[serde(default)]
    pub timeout_per_request: Option<f64>,
    #[serde(default)]
    pub deadline_secs: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatAttempt {
    pub provider_id: String,
    #[serde(flatten)]
    pub request: ChatRequest,
}

impl From<ChatAttempt> for AttemptRequest<ChatRequest> {
    fn from(attempt: ChatAttempt) -> Self {
        AttemptRequest::new(attempt.provider_id, attempt.request)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeakAttempt {
    pub provider_id: String,
    #[serde(flatten)]
    pub request: SpeakRequest,
}

impl From<SpeakAttempt> for AttemptRequest<SpeakRequest> {
    fn from(attempt: SpeakAttempt) -> Self {
        AttemptRequest::new(attempt.provider_id, attempt.request)
    }
}

/// One transcription attempt. The audio file is shared by all attempts.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscribeAttempt {
    pub provider_id: String,
    pub model: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub gen_config: Option<serde_json::Value>,
}

fn seconds(name: &str, value: f64) -> Result<Duration, FallbackError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| FallbackError::Validation(format!("{name} must be a non-negative number")))
}

/// Turn a request body into a validated plan, applying configured defaults.
pub fn build_plan<R, P>(
    body: PlanBody<R>,
    settings: &FallbackSettings,
) -> Result<FallbackPlan<P>, AppError>
where
    AttemptRequest<P>: From<R>,
{
    if body.requests.len() > settings.max_attempts {
        return Err(FallbackError::Validation(format!(
            "plan has {} attempts, at most {} are allowed",
            body.requests.len(),
            settings.max_attempts
        ))
        .into());
    }

    let timeout = match body.timeout_per_request {
        Some(secs) => seconds("timeout_per_request", secs)?,
        None => settings.default_timeout(),
    };
    let attempts = body.requests.into_iter().map(AttemptRequest::from).collect();

    let mut plan = FallbackPlan::new(attempts, body.strategy, timeout)?;
    if let Some(secs) = body.deadline_secs {
        plan = plan.with_deadline(seconds("deadline_secs", secs)?)?;
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: &str) -> PlanBody<ChatAttempt> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_build_plan_with_defaults() {
        let plan: FallbackPlan<ChatRequest> = build_plan(
            body(
                r#"{"requests":[
                    {"provider_id":"p1","model":"m1","messages":[{"role":"user","content":"hi"}]},
                    {"provider_id":"p2","model":"m2","messages":[]}
                ]}"#,
            ),
            &FallbackSettings::default(),
        )
        .unwrap();

        assert_eq!(plan.strategy(), Strategy::Sequential);
        assert_eq!(plan.timeout_per_attempt(), Duration::from_secs(360));
        assert_eq!(plan.deadline(), None);
        assert_eq!(plan.attempts()[1].provider_id, "p2");
        assert_eq!(plan.attempts()[1].payload.model, "m2");
    }

    #[test]
    fn test_build_plan_with_options() {
        let plan: FallbackPlan<ChatRequest> = build_plan(
            body(
                r#"{"requests":[{"provider_id":"p1","model":"m","messages":[]}],
                    "strategy":"parallel","timeout_per_request":0.5,"deadline_secs":2}"#,
            ),
            &FallbackSettings::default(),
        )
        .unwrap();

        assert_eq!(plan.strategy(), Strategy::Parallel);
        assert_eq!(plan.timeout_per_attempt(), Duration::from_millis(500));
        assert_eq!(plan.deadline(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_build_plan_rejects_invalid() {
        let settings = FallbackSettings {
            max_attempts: 1,
            ..FallbackSettings::default()
        };
        let too_many = build_plan::<_, ChatRequest>(
            body(
                r#"{"requests":[
                    {"provider_id":"p1","model":"m","messages":[]},
                    {"provider_id":"p2","model":"m","messages":[]}
                ]}"#,
            ),
            &settings,
        );
        assert!(matches!(
            too_many,
            Err(AppError::Fallback(FallbackError::Validation(_)))
        ));

        let empty = build_plan::<_, ChatRequest>(body(r#"{"requests":[]}"#), &settings);
        assert!(matches!(
            empty,
            Err(AppError::Fallback(FallbackError::Validation(_)))
        ));

        let negative = build_plan::<_, ChatRequest>(
            body(
                r#"{"requests":[{"provider_id":"p1","model":"m","messages":[]}],
                    "timeout_per_request":-1}"#,
            ),
            &FallbackSettings::default(),
        );
        assert!(matches!(
            negative,
            Err(AppError::Fallback(FallbackError::Validation(_)))
        ));
    }

    #[test]
    fn test_build_plan_rejects_oversized_durations() {
        for extra in [r#""deadline_secs":1.5e19"#, r#""timeout_per_request":1e12"#] {
            let result = build_plan::<_, ChatRequest>(
                body(&format!(
                    r#"{{"requests":[{{"provider_id":"p1","model":"m","messages":[]}}],{extra}}}"#
                )),
                &FallbackSettings::default(),
            );
            assert!(
                matches!(result, Err(AppError::Fallback(FallbackError::Validation(_)))),
                "{extra} was accepted"
            );
        }
    }
}
