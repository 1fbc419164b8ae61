//! Validating admission endpoints for Elasticsearch clusters and license
//! Secrets.
use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};
use eck_operator::{
    client::ObjectStore,
    crd::elasticsearch::Elasticsearch,
    license::{LicenseChecker, verifier::Verifier},
    validation::{self, Verdict},
};
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Resource,
    core::{
        DynamicObject,
        admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    },
};
use serde::de::DeserializeOwned;

pub const VALIDATE_ELASTICSEARCH_PATH: &str = "/validate-elasticsearch";
pub const VALIDATE_LICENSE_PATH: &str = "/validate-license";

/// Everything the admission endpoints need to reach their verdict.
pub struct AdmissionState<S> {
    pub store: S,
    pub operator_namespace: String,

    /// Key of licenses issued by Elastic, if configured.
    pub enterprise_key: Option<Verifier>,
    pub max_name_length: usize,
}

pub fn router<S: ObjectStore + 'static>(state: Arc<AdmissionState<S>>) -> Router {
    Router::new()
        .route(VALIDATE_ELASTICSEARCH_PATH, post(validate_elasticsearch::<S>))
        .route(VALIDATE_LICENSE_PATH, post(validate_license::<S>))
        .with_state(state)
}

async fn validate_elasticsearch<S: ObjectStore + 'static>(
    State(state): State<Arc<AdmissionState<S>>>,
    Json(review): Json<AdmissionReview<Elasticsearch>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let response = match into_request(review) {
        Ok(request) => review_elasticsearch(&request, state.max_name_length),
        Err(response) => response,
    };
    Json(response.into_review())
}

async fn validate_license<S: ObjectStore + 'static>(
    State(state): State<Arc<AdmissionState<S>>>,
    Json(review): Json<AdmissionReview<Secret>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request = match into_request(review) {
        Ok(request) => request,
        Err(response) => return Json(response.into_review()),
    };

    let checker = match LicenseChecker::load(
        &state.store,
        &state.operator_namespace,
        state.enterprise_key.clone(),
    )
    .await
    {
        Ok(checker) => checker,
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "failed to load the trial key, checking against the enterprise key only"
            );
            LicenseChecker {
                enterprise: state.enterprise_key.clone(),
                trial: None,
            }
        }
    };
    Json(review_license(&request, &checker).into_review())
}

fn into_request<K>(review: AdmissionReview<K>) -> Result<AdmissionRequest<K>, AdmissionResponse>
where
    K: Resource + DeserializeOwned,
{
    review.try_into().map_err(|err| {
        AdmissionResponse::invalid(format!("failed to convert to request: {err}"))
    })
}

fn respond<K: Resource>(request: &AdmissionRequest<K>, verdict: Verdict) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    if verdict.allowed {
        response
    } else {
        tracing::info!(
            uid = %request.uid,
            name = %request.name,
            reason = %verdict.reason,
            "admission denied"
        );
        response.deny(verdict.reason)
    }
}

/// Answers an admission request for an Elasticsearch cluster. Deletions are
/// always allowed.
pub fn review_elasticsearch(
    request: &AdmissionRequest<Elasticsearch>,
    max_name_length: usize,
) -> AdmissionResponse {
    let verdict = match (&request.operation, &request.object) {
        (Operation::Delete, _) | (_, None) => Verdict::allow(),
        (_, Some(proposed)) => Verdict::from(validation::elasticsearch::validate(
            proposed,
            request.old_object.as_ref(),
            max_name_length,
        )),
    };
    respond(request, verdict)
}

/// Answers an admission request for a Secret. Only license Secrets are
/// checked, deletions are always allowed.
pub fn review_license(
    request: &AdmissionRequest<Secret>,
    checker: &LicenseChecker,
) -> AdmissionResponse {
    let verdict = match (&request.operation, &request.object) {
        (Operation::Delete, _) | (_, None) => Verdict::allow(),
        (_, Some(secret)) => Verdict::from(validation::license::validate(secret, checker)),
    };
    respond(request, verdict)
}
