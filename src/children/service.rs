use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};

use super::{child_meta, selector_labels};
use crate::{crd::SpringBootApplication, error::Result};

/// Port the Service exposes inside the cluster.
pub const EXTERNAL_PORT: i32 = 80;

/// ClusterIP Service forwarding [`EXTERNAL_PORT`] to the application's port.
pub fn build(app: &SpringBootApplication) -> Result<Service> {
    Ok(Service {
        metadata: child_meta(app)?,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: EXTERNAL_PORT,
                target_port: Some(IntOrString::Int(app.spec.port)),
                ..Default::default()
            }]),
            selector: Some(selector_labels(app)),
            ..Default::default()
        }),
        ..Default::default()
    })
}
