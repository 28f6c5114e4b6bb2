//! Desired state of the objects owned by a [`SpringBootApplication`].
//!
//! Every builder here is a pure function of the application. Writing the
//! result and stamping the owner reference is left to [`crate::sync`].

use std::collections::BTreeMap;

use k8s_openapi::api::{
    apps::v1::Deployment,
    autoscaling::v2::HorizontalPodAutoscaler,
    core::v1::{ConfigMap, Service},
};
use kube::{ResourceExt, api::ObjectMeta};

use crate::{
    crd::SpringBootApplication,
    error::{Error, Result},
    store::StoredObject,
};

pub mod autoscaler;
pub mod config_map;
pub mod deployment;
pub mod service;

pub const APP_LABEL: &str = "app";

/// An object kind built for, and owned by, an application.
pub trait Child: StoredObject {
    /// Top-level fields the builder owns. Updates replace them wholesale,
    /// together with `metadata.labels`.
    const OWNED_FIELDS: &'static [&'static str] = &["spec"];

    /// Copies into `self` the parts of owned fields that another controller manages.
    fn keep_managed_elsewhere(&mut self, _current: &Self) {}
}

impl Child for ConfigMap {
    const OWNED_FIELDS: &'static [&'static str] = &["data"];
}

impl Child for Service {}

impl Child for HorizontalPodAutoscaler {}

impl Child for Deployment {
    // the autoscaler writes replicas
    fn keep_managed_elsewhere(&mut self, current: &Self) {
        let replicas = current.spec.as_ref().and_then(|spec| spec.replicas);
        if let Some(spec) = self.spec.as_mut() {
            spec.replicas = replicas;
        }
    }
}

/// Name and namespace shared with the parent, plus the parent's labels.
pub(crate) fn child_meta(app: &SpringBootApplication) -> Result<ObjectMeta> {
    let namespace = app
        .namespace()
        .ok_or(Error::MissingField("metadata.namespace"))?;

    Ok(ObjectMeta {
        name: Some(app.name_any()),
        namespace: Some(namespace),
        labels: app.metadata.labels.clone(),
        ..Default::default()
    })
}

/// Labels used to select the application's pods.
pub fn selector_labels(app: &SpringBootApplication) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), app.name_any())])
}
