use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EnvVar,
            HTTPGetAction, PodSecurityContext, PodSpec, PodTemplateSpec, Probe, SeccompProfile,
            SecurityContext, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube::{ResourceExt, api::ObjectMeta};

use super::{child_meta, selector_labels};
use crate::{crd::SpringBootApplication, error::Result, requirements};

pub const CONTAINER_NAME: &str = "app";
pub const CONFIG_VOLUME: &str = "config";
pub const CONFIG_MOUNT_PATH: &str = "/config";

const PROBE_PERIOD_SECONDS: i32 = 10;
const PROBE_FAILURE_THRESHOLD: i32 = 3;
// 30 failures at a 10s period gives the app ~5 minutes to start.
const STARTUP_FAILURE_THRESHOLD: i32 = 30;

/// Deployment running the application container.
///
/// Replicas are left unset: the HorizontalPodAutoscaler owns them.
pub fn build(app: &SpringBootApplication) -> Result<Deployment> {
    let resources = requirements::resolve(&app.spec)?;

    let mut template_labels = app.labels().clone();
    template_labels.extend(selector_labels(app));

    let port = app.spec.port;
    let context_path = &app.spec.context_path;

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(app.spec.image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: port,
            ..Default::default()
        }]),
        resources: Some(resources),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        env: Some(vec![
            EnvVar {
                // merged on top of the configuration packaged in the image
                name: "SPRING_CONFIG_ADDITIONAL_LOCATION".to_string(),
                value: Some(CONFIG_MOUNT_PATH.to_string()),
                ..Default::default()
            },
            EnvVar {
                // the JVM only gives 25% of the container memory to the heap by default
                name: "JAVA_TOOL_OPTIONS".to_string(),
                value: Some("-XX:MaxRAMPercentage=70".to_string()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        readiness_probe: Some(health_probe(
            probe_path(context_path, "readiness"),
            port,
            PROBE_FAILURE_THRESHOLD,
        )),
        liveness_probe: Some(health_probe(
            probe_path(context_path, "liveness"),
            port,
            PROBE_FAILURE_THRESHOLD,
        )),
        startup_probe: Some(health_probe(
            probe_path(context_path, "liveness"),
            port,
            STARTUP_FAILURE_THRESHOLD,
        )),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: child_meta(app)?,
        spec: Some(DeploymentSpec {
            replicas: None,
            selector: LabelSelector {
                match_labels: Some(selector_labels(app)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(template_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    security_context: Some(PodSecurityContext {
                        run_as_non_root: Some(true),
                        seccomp_profile: Some(SeccompProfile {
                            type_: "RuntimeDefault".to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: app.name_any().into(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Actuator health endpoint for `kind`, below the context path.
///
/// Exactly one trailing slash is dropped from the context path so `/api` and
/// `/api/` probe the same URL, and a root context path adds no prefix.
pub fn probe_path(context_path: &str, kind: &str) -> String {
    let prefix = context_path.strip_suffix('/').unwrap_or(context_path);
    format!("{prefix}/actuator/health/{kind}")
}

fn health_probe(path: String, port: i32, failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path),
            port: IntOrString::Int(port),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        timeout_seconds: Some(1),
        period_seconds: Some(PROBE_PERIOD_SECONDS),
        success_threshold: Some(1),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}
