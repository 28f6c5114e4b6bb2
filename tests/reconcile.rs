use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        autoscaling::v2::HorizontalPodAutoscaler,
        core::v1::{ConfigMap, Service},
    },
    apimachinery::pkg::api::resource::Quantity,
};
use kube::{Resource, ResourceExt, api::ObjectMeta};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use spring_boot_operator::{
    children::{autoscaler, deployment},
    controller::{Context, reconcile_app},
    crd::{
        AppType, ResourceDefinition, ResourcePreset, ScalingBehaviour, ScalingPolicy,
        ScalingPolicyType, ScalingRules, SelectPolicy, SpringBootApplication,
        SpringBootApplicationSpec, SpringBootApplicationStatus,
    },
    error::Error,
    status::{REASON_CONFIG_MERGE_FAILED, REASON_CONFIG_MERGED, VALID},
    store::{MemoryStore, ObjectKey, ObjectStore, StoredObject, Verb},
    sync::SyncOutcome,
};

fn key() -> ObjectKey {
    ObjectKey::new("default", "test-app")
}

fn application(spec: SpringBootApplicationSpec) -> SpringBootApplication {
    let mut app = SpringBootApplication::new("test-app", spec);
    app.metadata = ObjectMeta {
        name: Some("test-app".to_string()),
        namespace: Some("default".to_string()),
        generation: Some(1),
        ..Default::default()
    };
    app
}

fn small(image: &str) -> SpringBootApplicationSpec {
    let mut spec = SpringBootApplicationSpec::new(image);
    spec.resource_preset = Some(ResourcePreset::Small);
    spec
}

fn context_with(spec: SpringBootApplicationSpec) -> Context<MemoryStore> {
    let store = MemoryStore::new();
    store.insert(application(spec)).unwrap();
    Context::new(store, CancellationToken::new())
}

fn stored<K: StoredObject>(ctx: &Context<MemoryStore>) -> K {
    ctx.store.object(&key()).unwrap().unwrap()
}

fn app_container(ctx: &Context<MemoryStore>) -> k8s_openapi::api::core::v1::Container {
    let deployment: Deployment = stored(ctx);
    deployment.spec.unwrap().template.spec.unwrap().containers.remove(0)
}

#[tokio::test]
async fn small_preset_sets_requests_and_memory_limit() {
    let ctx = context_with(small("test"));
    reconcile_app(&key(), &ctx).await.unwrap();

    let resources = app_container(&ctx).resources.unwrap();
    assert_eq!(
        resources.requests.unwrap(),
        BTreeMap::from([
            ("cpu".to_string(), Quantity("1".to_string())),
            ("memory".to_string(), Quantity("1Gi".to_string())),
        ])
    );
    let limits = resources.limits.unwrap();
    assert_eq!(limits.len(), 1);
    assert_eq!(limits["memory"], Quantity("1Gi".to_string()));
}

#[tokio::test]
async fn explicit_resources_are_used() {
    let mut spec = SpringBootApplicationSpec::new("test");
    spec.resources = Some(ResourceDefinition {
        cpu: "2".to_string(),
        memory: "8Gi".to_string(),
    });
    let ctx = context_with(spec);
    reconcile_app(&key(), &ctx).await.unwrap();

    let resources = app_container(&ctx).resources.unwrap();
    let requests = resources.requests.unwrap();
    assert_eq!(requests["cpu"], Quantity("2".to_string()));
    assert_eq!(requests["memory"], Quantity("8Gi".to_string()));
    assert_eq!(
        resources.limits.unwrap(),
        BTreeMap::from([("memory".to_string(), Quantity("8Gi".to_string()))])
    );
}

#[tokio::test]
async fn default_port_renders_minimal_config() {
    let ctx = context_with(small("test"));
    reconcile_app(&key(), &ctx).await.unwrap();

    let cm: ConfigMap = stored(&ctx);
    let data = cm.data.unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data["application.yaml"], "server:\n  port: 8080\n");
}

#[tokio::test]
async fn autoscaler_uses_bounds_and_web_target() {
    let mut spec = small("test");
    spec.app_type = AppType::Web;
    spec.autoscaler.min_replicas = 1;
    spec.autoscaler.max_replicas = 5;
    let ctx = context_with(spec);
    reconcile_app(&key(), &ctx).await.unwrap();

    let hpa: HorizontalPodAutoscaler = stored(&ctx);
    let spec = hpa.spec.unwrap();
    assert_eq!(spec.min_replicas, Some(1));
    assert_eq!(spec.max_replicas, 5);
    let metrics = spec.metrics.unwrap();
    assert_eq!(
        metrics[0].resource.as_ref().unwrap().target.average_utilization,
        Some(70)
    );
}

#[tokio::test]
async fn overridden_port_flows_everywhere() {
    let mut spec = small("test");
    spec.port = 3333;
    spec.config = Some(json!({ "server": { "port": 1234 } }));
    let ctx = context_with(spec);
    reconcile_app(&key(), &ctx).await.unwrap();

    let cm: ConfigMap = stored(&ctx);
    assert_eq!(cm.data.unwrap()["application.yaml"], "server:\n  port: 3333\n");

    let svc: Service = stored(&ctx);
    let port = &svc.spec.unwrap().ports.unwrap()[0];
    assert_eq!(port.port, 80);
    assert_eq!(
        port.target_port,
        Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(3333))
    );

    assert_eq!(app_container(&ctx).ports.unwrap()[0].container_port, 3333);
}

#[tokio::test]
async fn second_pass_writes_nothing() {
    let ctx = context_with(small("test"));

    let first = reconcile_app(&key(), &ctx).await.unwrap().unwrap();
    assert!(first.config_valid);
    assert!(
        first
            .children
            .iter()
            .all(|(_, outcome)| *outcome == SyncOutcome::Created)
    );
    let writes = ctx.store.write_count();
    // status plus the four children
    assert_eq!(writes, 5);

    let second = reconcile_app(&key(), &ctx).await.unwrap().unwrap();
    assert!(!second.wrote_anything());
    assert_eq!(ctx.store.write_count(), writes);
}

#[tokio::test]
async fn children_are_synced_in_order() {
    let ctx = context_with(small("test"));
    reconcile_app(&key(), &ctx).await.unwrap();

    let kinds: Vec<_> = ctx
        .store
        .writes()
        .into_iter()
        .map(|w| (w.verb, w.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (Verb::Status, "SpringBootApplication".to_string()),
            (Verb::Create, "ConfigMap".to_string()),
            (Verb::Create, "Service".to_string()),
            (Verb::Create, "Deployment".to_string()),
            (Verb::Create, "HorizontalPodAutoscaler".to_string()),
        ]
    );
}

#[tokio::test]
async fn every_child_is_controlled_by_the_application() {
    let ctx = context_with(small("test"));
    reconcile_app(&key(), &ctx).await.unwrap();

    let app: SpringBootApplication = stored(&ctx);
    let expected = app.controller_owner_ref(&()).unwrap();

    let owners = [
        stored::<ConfigMap>(&ctx).owner_references().to_vec(),
        stored::<Service>(&ctx).owner_references().to_vec(),
        stored::<Deployment>(&ctx).owner_references().to_vec(),
        stored::<HorizontalPodAutoscaler>(&ctx)
            .owner_references()
            .to_vec(),
    ];
    for refs in owners {
        assert_eq!(refs, vec![expected.clone()]);
        assert_eq!(refs[0].controller, Some(true));
        assert_eq!(refs[0].kind, "SpringBootApplication");
    }
}

#[tokio::test]
async fn valid_condition_is_recorded() {
    let ctx = context_with(small("test"));
    reconcile_app(&key(), &ctx).await.unwrap();

    let app: SpringBootApplication = stored(&ctx);
    let status = app.status.unwrap();
    let valid = status.conditions.get(VALID).unwrap();
    assert!(valid.is_true());
    assert_eq!(valid.reason, REASON_CONFIG_MERGED);
    assert_eq!(valid.observed_generation, Some(1));
}

#[tokio::test]
async fn failed_merge_is_recorded_and_children_are_left_alone() {
    let ctx = context_with(small("test"));
    reconcile_app(&key(), &ctx).await.unwrap();
    let cm_before: ConfigMap = stored(&ctx);

    ctx.store
        .modify::<SpringBootApplication>(&key(), |app| {
            app.spec.config = Some(json!(["not", "a", "mapping"]));
            app.spec.image = "test:v2".to_string();
            app.metadata.generation = Some(2);
        })
        .unwrap();
    let writes = ctx.store.write_count();

    let report = reconcile_app(&key(), &ctx).await.unwrap().unwrap();
    assert!(!report.config_valid);
    assert!(report.children.is_empty());

    // only the status changed
    assert_eq!(ctx.store.write_count(), writes + 1);
    assert_eq!(ctx.store.writes().last().unwrap().verb, Verb::Status);
    assert_eq!(stored::<ConfigMap>(&ctx), cm_before);
    assert_eq!(app_container(&ctx).image.as_deref(), Some("test"));

    let app: SpringBootApplication = stored(&ctx);
    let conditions = app.status.unwrap().conditions;
    assert_eq!(conditions.len(), 1);
    let valid = conditions.get(VALID).unwrap();
    assert!(!valid.is_true());
    assert_eq!(valid.reason, REASON_CONFIG_MERGE_FAILED);
    assert!(valid.message.starts_with("DecodeError"));
    assert_eq!(valid.observed_generation, Some(2));
}

#[tokio::test]
async fn failed_merge_on_first_pass_creates_nothing() {
    let mut spec = small("test");
    spec.config = Some(json!("server.port=9000"));
    let ctx = context_with(spec);

    let report = reconcile_app(&key(), &ctx).await.unwrap().unwrap();

    assert!(!report.config_valid);
    assert!(ctx.store.object::<ConfigMap>(&key()).unwrap().is_none());
    assert!(ctx.store.object::<Deployment>(&key()).unwrap().is_none());
}

#[tokio::test]
async fn drift_is_repaired_and_autoscaled_replicas_kept() {
    let ctx = context_with(small("test"));
    reconcile_app(&key(), &ctx).await.unwrap();

    ctx.store
        .modify::<Deployment>(&key(), |deployment| {
            let spec = deployment.spec.as_mut().unwrap();
            spec.replicas = Some(4);
            spec.template.spec.as_mut().unwrap().containers[0].image =
                Some("someone-else".to_string());
        })
        .unwrap();

    let report = reconcile_app(&key(), &ctx).await.unwrap().unwrap();
    assert!(report.children.contains(&("Deployment", SyncOutcome::Updated)));
    assert!(report.children.contains(&("ConfigMap", SyncOutcome::Unchanged)));

    let deployment: Deployment = stored(&ctx);
    let spec = deployment.spec.unwrap();
    assert_eq!(spec.replicas, Some(4));
    assert_eq!(
        spec.template.spec.unwrap().containers[0].image.as_deref(),
        Some("test")
    );
}

#[tokio::test]
async fn spec_change_updates_children() {
    let ctx = context_with(small("test"));
    reconcile_app(&key(), &ctx).await.unwrap();

    ctx.store
        .modify::<SpringBootApplication>(&key(), |app| {
            app.spec.resource_preset = Some(ResourcePreset::Large);
            app.spec.context_path = "/shop/".to_string();
        })
        .unwrap();
    reconcile_app(&key(), &ctx).await.unwrap();

    let container = app_container(&ctx);
    assert_eq!(
        container.resources.unwrap().requests.unwrap()["cpu"],
        Quantity("4".to_string())
    );
    let probe = container.readiness_probe.unwrap().http_get.unwrap();
    assert_eq!(probe.path.as_deref(), Some("/shop/actuator/health/readiness"));

    let cm: ConfigMap = stored(&ctx);
    assert_eq!(
        cm.data.unwrap()["application.yaml"],
        "server:\n  port: 8080\n  servlet:\n    context-path: /shop/\n"
    );
}

#[tokio::test]
async fn missing_resources_stop_before_the_deployment() {
    let ctx = context_with(SpringBootApplicationSpec::new("test"));

    let err = reconcile_app(&key(), &ctx).await.unwrap_err();
    assert!(matches!(err, Error::MissingResources));
    assert!(!err.is_retryable());

    assert!(ctx.store.object::<ConfigMap>(&key()).unwrap().is_some());
    assert!(ctx.store.object::<Service>(&key()).unwrap().is_some());
    assert!(ctx.store.object::<Deployment>(&key()).unwrap().is_none());
    assert!(
        ctx.store
            .object::<HorizontalPodAutoscaler>(&key())
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn missing_application_is_a_no_op() {
    let ctx = Context::new(MemoryStore::new(), CancellationToken::new());

    assert_eq!(reconcile_app(&key(), &ctx).await.unwrap(), None);
    assert_eq!(ctx.store.write_count(), 0);
}

#[tokio::test]
async fn cancelled_invocation_aborts() {
    let ctx = context_with(small("test"));
    ctx.cancel.cancel();

    let err = reconcile_app(&key(), &ctx).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(ctx.store.write_count(), 0);
}

#[tokio::test]
async fn removed_behaviour_block_reverts_to_type_default() {
    let mut spec = small("test");
    spec.autoscaler.behaviour = Some(ScalingBehaviour {
        scale_up: None,
        scale_down: Some(ScalingRules {
            // same window as the web default
            stabilization_window_seconds: Some(300),
            select_policy: Some(SelectPolicy::Min),
            policies: Some(vec![ScalingPolicy {
                policy_type: ScalingPolicyType::Pods,
                value: 1,
                period_seconds: 60,
            }]),
        }),
    });
    let ctx = context_with(spec);
    reconcile_app(&key(), &ctx).await.unwrap();

    ctx.store
        .modify::<SpringBootApplication>(&key(), |app| app.spec.autoscaler.behaviour = None)
        .unwrap();
    let report = reconcile_app(&key(), &ctx).await.unwrap().unwrap();
    assert!(report.children.contains(&("HorizontalPodAutoscaler", SyncOutcome::Updated)));

    let app: SpringBootApplication = stored(&ctx);
    let hpa: HorizontalPodAutoscaler = stored(&ctx);
    assert_eq!(hpa.spec, autoscaler::build(&app).unwrap().spec);
    assert_eq!(
        hpa.spec.unwrap().behavior.unwrap().scale_down,
        autoscaler::default_behaviour(AppType::Web).scale_down
    );
}

#[tokio::test]
async fn dropped_policies_leave_the_custom_block_bare() {
    let mut spec = small("test");
    spec.autoscaler.behaviour = Some(ScalingBehaviour {
        scale_up: Some(ScalingRules {
            stabilization_window_seconds: Some(0),
            select_policy: None,
            policies: Some(vec![ScalingPolicy {
                policy_type: ScalingPolicyType::Pods,
                value: 4,
                period_seconds: 15,
            }]),
        }),
        scale_down: None,
    });
    let ctx = context_with(spec);
    reconcile_app(&key(), &ctx).await.unwrap();

    ctx.store
        .modify::<SpringBootApplication>(&key(), |app| {
            if let Some(up) = app
                .spec
                .autoscaler
                .behaviour
                .as_mut()
                .and_then(|b| b.scale_up.as_mut())
            {
                up.policies = None;
            }
        })
        .unwrap();
    reconcile_app(&key(), &ctx).await.unwrap();

    let app: SpringBootApplication = stored(&ctx);
    let hpa: HorizontalPodAutoscaler = stored(&ctx);
    assert_eq!(hpa.spec, autoscaler::build(&app).unwrap().spec);

    let scale_up = hpa.spec.unwrap().behavior.unwrap().scale_up.unwrap();
    assert_eq!(scale_up.stabilization_window_seconds, Some(0));
    assert_eq!(scale_up.policies, None);
}

#[tokio::test]
async fn removed_parent_label_leaves_every_child() {
    let ctx = context_with(small("test"));
    ctx.store
        .modify::<SpringBootApplication>(&key(), |app| {
            app.metadata.labels = Some(BTreeMap::from([(
                "team".to_string(),
                "payments".to_string(),
            )]));
        })
        .unwrap();
    reconcile_app(&key(), &ctx).await.unwrap();
    assert_eq!(stored::<Service>(&ctx).labels()["team"], "payments");

    ctx.store
        .modify::<SpringBootApplication>(&key(), |app| app.metadata.labels = None)
        .unwrap();
    let report = reconcile_app(&key(), &ctx).await.unwrap().unwrap();
    assert!(
        report
            .children
            .iter()
            .all(|(_, outcome)| *outcome == SyncOutcome::Updated)
    );

    assert!(stored::<ConfigMap>(&ctx).labels().is_empty());
    assert!(stored::<Service>(&ctx).labels().is_empty());
    assert!(stored::<HorizontalPodAutoscaler>(&ctx).labels().is_empty());

    let app: SpringBootApplication = stored(&ctx);
    let workload: Deployment = stored(&ctx);
    assert!(workload.labels().is_empty());
    assert_eq!(workload.spec, deployment::build(&app).unwrap().spec);

    let template = workload.spec.unwrap().template.metadata.unwrap();
    assert_eq!(
        template.labels,
        Some(BTreeMap::from([("app".to_string(), "test-app".to_string())]))
    );
}

/// Store where another writer touches every Deployment right after it is read.
struct RacingStore {
    inner: MemoryStore,
}

#[async_trait]
impl ObjectStore for RacingStore {
    async fn get<K: StoredObject>(&self, key: &ObjectKey) -> Result<Option<K>, Error> {
        let current = self.inner.get::<K>(key).await?;
        if K::kind(&()) == "Deployment" {
            self.inner.modify::<K>(key, |_| {})?;
        }
        Ok(current)
    }

    async fn create<K: StoredObject>(&self, object: &K) -> Result<K, Error> {
        self.inner.create(object).await
    }

    async fn update<K: StoredObject>(&self, object: &K) -> Result<K, Error> {
        self.inner.update(object).await
    }

    async fn write_status(
        &self,
        key: &ObjectKey,
        status: &SpringBootApplicationStatus,
    ) -> Result<(), Error> {
        self.inner.write_status(key, status).await
    }
}

#[tokio::test]
async fn concurrent_write_surfaces_as_retryable_conflict() {
    let inner = MemoryStore::new();
    inner.insert(application(small("test"))).unwrap();
    let ctx = Context::new(RacingStore { inner }, CancellationToken::new());

    // first pass creates; the racer only matters once there is something to update
    reconcile_app(&key(), &ctx).await.unwrap();
    ctx.store
        .inner
        .modify::<SpringBootApplication>(&key(), |app| {
            app.spec.image = "test:v2".to_string();
        })
        .unwrap();

    let err = reconcile_app(&key(), &ctx).await.unwrap_err();
    assert!(matches!(err, Error::Conflict { ref kind, .. } if kind == "Deployment"));
    assert!(err.is_retryable());

    let hpa: Option<HorizontalPodAutoscaler> = ctx.store.inner.object(&key()).unwrap();
    assert!(hpa.is_some());
}
