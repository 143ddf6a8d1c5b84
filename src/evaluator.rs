//! Evaluator client (C3): builds the AdmissionReview envelope for one
//! (policy, resource) pair, POSTs it to the policy's resolved endpoint
//! through a shared `reqwest::Client`, and maps the response into an
//! `Outcome`.
//!
//! The envelope mirrors the real Kubernetes admission webhook wire
//! schema (`admission.k8s.io/v1` `AdmissionReview`) rather than reusing
//! `kube`'s admission types, which model the *server* side of decoding
//! an incoming review — this scanner is the *client*, synthesizing a
//! request from a resource it already holds, closer to the teacher's own
//! hand-rolled `AdmissionVerdict` shape in `admission.rs` than to a
//! webhook handler.

use std::time::Duration;

use async_trait::async_trait;
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::catalog::{Gvr, PolicyEndpoint};
use crate::error::{Result, ScanError};

pub const API_VERSION: &str = "admission.k8s.io/v1";
pub const KIND: &str = "AdmissionReview";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub kind: RequestResource,
    pub resource: RequestResource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub operation: String,
    pub object: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Builds the synthetic AdmissionReview request for one resource against
/// one GVR, always as a `CREATE` since audit re-evaluates already-admitted
/// objects as if they were being created (`spec.md` §6.4 "Endpoint
/// protocol").
pub fn build_request(uid: &str, gvr: &Gvr, object: &DynamicObject) -> Result<AdmissionReview> {
    let namespace = object.metadata.namespace.clone();
    let object_json = serde_json::to_value(object).map_err(|e| ScanError::Evaluation {
        policy: String::new(),
        resource_uid: object.metadata.uid.clone().unwrap_or_default(),
        reason: format!("serializing resource: {e}"),
    })?;

    let resource = RequestResource {
        group: gvr.group.clone(),
        version: gvr.version.clone(),
        resource: gvr.resource.clone(),
    };

    Ok(AdmissionReview {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        request: Some(AdmissionRequest {
            uid: uid.to_string(),
            kind: resource.clone(),
            resource,
            namespace,
            operation: "CREATE".to_string(),
            object: object_json,
            old_object: None,
            dry_run: true,
        }),
        response: None,
    })
}

/// Outcome of evaluating one (policy, resource) pair, per `spec.md` §3
/// "EvaluationOutcome".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub outcome: Outcome,
    pub message: Option<String>,
}

/// Shared outbound HTTP client, built once at startup from `tls::build_client`.
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
    timeout: Duration,
}

impl Transport {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Evaluates one resource against one policy's endpoint, returning a
    /// fail-safe `Outcome::Error` (never propagating) on any transport or
    /// decode failure — matching `spec.md` §4.1's "errors localize to the
    /// affected unit of work" rule for policy evaluation.
    pub async fn evaluate(
        &self,
        policy_unique_name: &str,
        endpoint: &PolicyEndpoint,
        uid: &str,
        gvr: &Gvr,
        object: &DynamicObject,
    ) -> EvaluationResult {
        let review = match build_request(uid, gvr, object) {
            Ok(review) => review,
            Err(e) => {
                return EvaluationResult {
                    outcome: Outcome::Error,
                    message: Some(e.to_string()),
                };
            }
        };

        match self.post(&endpoint.0, &review).await {
            Ok(response) => map_response(&response),
            Err(reason) => {
                warn!(policy = policy_unique_name, %reason, "policy_evaluation_transport_error");
                EvaluationResult {
                    outcome: Outcome::Error,
                    message: Some(reason),
                }
            }
        }
    }

    async fn post(&self, endpoint: &Url, review: &AdmissionReview) -> std::result::Result<AdmissionReview, String> {
        let send = self.client.post(endpoint.clone()).json(review).send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| "evaluation timed out".to_string())?
            .map_err(|e| format!("request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AdmissionReview>(&body)
                .ok()
                .and_then(|review| review.response)
                .and_then(|r| r.status)
                .and_then(|s| s.message);
            return Err(message.unwrap_or_else(|| format!("policy server returned {status}")));
        }

        response
            .json::<AdmissionReview>()
            .await
            .map_err(|e| format!("decoding response: {e}"))
    }
}

/// One (policy, resource) evaluation, behind a trait so `engine.rs` can be
/// driven against a scripted fake in tests instead of a real HTTP POST.
#[async_trait]
pub trait Evaluate: Send + Sync {
    async fn evaluate(
        &self,
        policy_unique_name: &str,
        endpoint: &PolicyEndpoint,
        uid: &str,
        gvr: &Gvr,
        object: &DynamicObject,
    ) -> EvaluationResult;
}

#[async_trait]
impl Evaluate for Transport {
    async fn evaluate(
        &self,
        policy_unique_name: &str,
        endpoint: &PolicyEndpoint,
        uid: &str,
        gvr: &Gvr,
        object: &DynamicObject,
    ) -> EvaluationResult {
        Transport::evaluate(self, policy_unique_name, endpoint, uid, gvr, object).await
    }
}

fn map_response(review: &AdmissionReview) -> EvaluationResult {
    match &review.response {
        Some(response) if response.allowed => EvaluationResult {
            outcome: Outcome::Pass,
            message: None,
        },
        Some(response) => EvaluationResult {
            outcome: Outcome::Fail,
            message: response.status.as_ref().and_then(|s| s.message.clone()),
        },
        None => EvaluationResult {
            outcome: Outcome::Error,
            message: Some("policy server response missing 'response' field".to_string()),
        },
    }
}

/// Scripted `Evaluate` fake: returns a pre-seeded outcome per policy
/// unique name, or `Outcome::Error` if the policy wasn't scripted —
/// matching a policy server that's unreachable for that policy.
#[cfg(test)]
pub struct FakeTransport {
    pub outcomes: std::collections::BTreeMap<String, EvaluationResult>,
}

#[cfg(test)]
impl FakeTransport {
    pub fn new() -> Self {
        Self {
            outcomes: std::collections::BTreeMap::new(),
        }
    }

    pub fn with_outcome(mut self, policy_unique_name: &str, outcome: Outcome, message: Option<&str>) -> Self {
        self.outcomes.insert(
            policy_unique_name.to_string(),
            EvaluationResult {
                outcome,
                message: message.map(str::to_string),
            },
        );
        self
    }
}

#[cfg(test)]
#[async_trait]
impl Evaluate for FakeTransport {
    async fn evaluate(
        &self,
        policy_unique_name: &str,
        _endpoint: &PolicyEndpoint,
        _uid: &str,
        _gvr: &Gvr,
        _object: &DynamicObject,
    ) -> EvaluationResult {
        self.outcomes.get(policy_unique_name).cloned().unwrap_or(EvaluationResult {
            outcome: Outcome::Error,
            message: Some("no scripted outcome for policy".to_string()),
        })
    }
}
