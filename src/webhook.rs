//! Mutating admission webhook that normalizes `SpringBootApplication` specs on write.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    routing::{get, post},
};
use kube::{
    Resource, ResourceExt,
    core::{
        DynamicObject,
        admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    },
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    crd::{AppType, ResourcePreset, SpringBootApplication, SpringBootApplicationSpec},
    error::{Error, Result},
};

pub const MUTATE_PATH: &str = "/mutate";

/// Explicit resources win over a preset; with neither, the preset becomes `small`.
pub fn default(app: &mut SpringBootApplication) {
    info!(name = app.name_any(), "defaulting SpringBootApplication");
    default_spec(&mut app.spec);
}

pub fn default_spec(spec: &mut SpringBootApplicationSpec) {
    if spec.resources.is_some() {
        spec.resource_preset = None;
    } else if spec.resource_preset.is_none() {
        spec.resource_preset = Some(ResourcePreset::Small);
    }
}

/// Answers an admission review with the defaulting patch, or denies it.
pub fn mutate(review: AdmissionReview<DynamicObject>) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "invalid admission review");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };

    let response = match defaulting_patch(&request) {
        Ok(None) => AdmissionResponse::from(&request),
        Ok(Some(patch)) => AdmissionResponse::from(&request)
            .with_patch(patch)
            .unwrap_or_else(|e| AdmissionResponse::from(&request).deny(e.to_string())),
        Err(e) => {
            warn!(error = %e, "rejecting admission request");
            AdmissionResponse::from(&request).deny(e.to_string())
        }
    };

    response.into_review()
}

fn defaulting_patch(
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Option<json_patch::Patch>> {
    let expected_kind = SpringBootApplication::kind(&());
    let expected_group = SpringBootApplication::group(&());
    if request.kind.kind != expected_kind || request.kind.group != expected_group {
        return Err(Error::TypeMismatch {
            expected: format!("{expected_group}/{expected_kind}"),
            got: format!("{}/{}", request.kind.group, request.kind.kind),
        });
    }

    // deletes carry no object
    let Some(object) = &request.object else {
        return Ok(None);
    };

    let original = serde_json::to_value(object)?;
    check_enums(&original["spec"])?;

    let mut app: SpringBootApplication = serde_json::from_value(original.clone())?;
    default(&mut app);

    let mut defaulted = original.clone();
    defaulted["spec"] = serde_json::to_value(&app.spec)?;

    let patch = json_patch::diff(&original, &defaulted);
    Ok((!patch.0.is_empty()).then_some(patch))
}

// Surfaces bad enum strings as domain errors instead of a generic decode failure.
fn check_enums(spec: &Value) -> Result<()> {
    if let Some(app_type) = spec.get("type").and_then(Value::as_str) {
        app_type.parse::<AppType>()?;
    }
    if let Some(preset) = spec.get("resourcePreset").and_then(Value::as_str) {
        preset.parse::<ResourcePreset>()?;
    }
    Ok(())
}

async fn handle_mutate(
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(mutate(review))
}

pub fn router() -> Router {
    Router::new()
        .route(MUTATE_PATH, post(handle_mutate))
        .route("/healthz", get(|| async { "ok" }))
}

/// Serves the webhook over plain HTTP until `cancel` fires.
///
/// The API server only calls webhooks over TLS, so this is expected to sit
/// behind a TLS terminating proxy.
pub async fn serve(addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "serving admission webhook");

    axum::serve(listener, router())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("admission webhook has been terminated");
    Ok(())
}
