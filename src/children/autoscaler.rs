use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HPAScalingPolicy, HPAScalingRules, HorizontalPodAutoscaler,
    HorizontalPodAutoscalerBehavior, HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget,
    ResourceMetricSource,
};
use kube::ResourceExt;

use super::child_meta;
use crate::{
    crd::{
        AppType, ScalingBehaviour, ScalingPolicyType, ScalingRules, SelectPolicy,
        SpringBootApplication,
    },
    error::Result,
};

/// Per-framework scaling profile used when the user supplies no behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BehaviourProfile {
    pub scale_up_stabilization_seconds: i32,
    pub scale_up_percent: i32,
    pub scale_up_period_seconds: i32,
    pub scale_down_stabilization_seconds: i32,
}

/// Average CPU utilization the autoscaler aims for.
pub fn target_utilization(app_type: AppType, explicit: Option<i32>) -> i32 {
    explicit.unwrap_or(match app_type {
        AppType::Web => 70,
        AppType::Webflux => 75,
        AppType::Native => 65,
    })
}

pub fn behaviour_profile(app_type: AppType) -> BehaviourProfile {
    let (up_window, up_percent, up_period, down_window) = match app_type {
        AppType::Web => (30, 50, 60, 300),
        AppType::Webflux => (20, 75, 60, 240),
        AppType::Native => (10, 100, 30, 120),
    };
    BehaviourProfile {
        scale_up_stabilization_seconds: up_window,
        scale_up_percent: up_percent,
        scale_up_period_seconds: up_period,
        scale_down_stabilization_seconds: down_window,
    }
}

pub fn default_behaviour(app_type: AppType) -> HorizontalPodAutoscalerBehavior {
    let profile = behaviour_profile(app_type);

    HorizontalPodAutoscalerBehavior {
        scale_up: Some(HPAScalingRules {
            stabilization_window_seconds: Some(profile.scale_up_stabilization_seconds),
            policies: Some(vec![HPAScalingPolicy {
                type_: "Percent".to_string(),
                value: profile.scale_up_percent,
                period_seconds: profile.scale_up_period_seconds,
            }]),
            ..Default::default()
        }),
        scale_down: Some(HPAScalingRules {
            stabilization_window_seconds: Some(profile.scale_down_stabilization_seconds),
            ..Default::default()
        }),
    }
}

/// Fills the blocks missing from `custom` with the framework defaults.
///
/// A block the user supplied is taken whole, never merged field by field
/// with the default block.
pub fn merge_behaviour(
    custom: Option<&ScalingBehaviour>,
    defaults: HorizontalPodAutoscalerBehavior,
) -> HorizontalPodAutoscalerBehavior {
    let Some(custom) = custom else {
        return defaults;
    };

    HorizontalPodAutoscalerBehavior {
        scale_up: custom
            .scale_up
            .as_ref()
            .map(scaling_rules)
            .or(defaults.scale_up),
        scale_down: custom
            .scale_down
            .as_ref()
            .map(scaling_rules)
            .or(defaults.scale_down),
    }
}

fn scaling_rules(rules: &ScalingRules) -> HPAScalingRules {
    HPAScalingRules {
        stabilization_window_seconds: rules.stabilization_window_seconds,
        select_policy: rules.select_policy.map(|policy| {
            match policy {
                SelectPolicy::Max => "Max",
                SelectPolicy::Min => "Min",
                SelectPolicy::Disabled => "Disabled",
            }
            .to_string()
        }),
        policies: rules.policies.as_ref().map(|policies| {
            policies
                .iter()
                .map(|p| HPAScalingPolicy {
                    type_: match p.policy_type {
                        ScalingPolicyType::Pods => "Pods",
                        ScalingPolicyType::Percent => "Percent",
                    }
                    .to_string(),
                    value: p.value,
                    period_seconds: p.period_seconds,
                })
                .collect()
        }),
        ..Default::default()
    }
}

pub fn autoscaler_spec(app: &SpringBootApplication) -> HorizontalPodAutoscalerSpec {
    let autoscaler = &app.spec.autoscaler;
    let app_type = app.spec.app_type;

    let utilization =
        target_utilization(app_type, autoscaler.target_utilization.cpu_percentage);

    HorizontalPodAutoscalerSpec {
        scale_target_ref: CrossVersionObjectReference {
            api_version: Some("apps/v1".to_string()),
            kind: "Deployment".to_string(),
            name: app.name_any(),
        },
        min_replicas: Some(autoscaler.min_replicas),
        max_replicas: autoscaler.max_replicas,
        metrics: Some(vec![MetricSpec {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: "cpu".to_string(),
                target: MetricTarget {
                    type_: "Utilization".to_string(),
                    average_utilization: Some(utilization),
                    ..Default::default()
                },
            }),
            ..Default::default()
        }]),
        behavior: Some(merge_behaviour(
            autoscaler.behaviour.as_ref(),
            default_behaviour(app_type),
        )),
    }
}

/// HorizontalPodAutoscaler scaling the application's Deployment on CPU.
pub fn build(app: &SpringBootApplication) -> Result<HorizontalPodAutoscaler> {
    Ok(HorizontalPodAutoscaler {
        metadata: child_meta(app)?,
        spec: Some(autoscaler_spec(app)),
        ..Default::default()
    })
}
