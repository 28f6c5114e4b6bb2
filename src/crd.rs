use std::{fmt, str::FromStr};

use kube::CustomResource;
use schemars::{
    JsonSchema,
    r#gen::SchemaGenerator,
    schema::{InstanceType, Schema, SchemaObject},
};
use serde::{Deserialize, Serialize};

use crate::{error::Error, status::Conditions};

pub const DEFAULT_PORT: i32 = 8080;
pub const DEFAULT_CONTEXT_PATH: &str = "/";
pub const DEFAULT_MIN_REPLICAS: i32 = 2;
pub const DEFAULT_MAX_REPLICAS: i32 = 10;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    kind = "SpringBootApplication",
    group = "spring.dante-lor.github.io",
    version = "v1alpha1",
    namespaced,
    shortname = "sba",
    status = "SpringBootApplicationStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpringBootApplicationSpec {
    #[schemars(length(min = 1))]
    pub image: String,

    #[serde(default, rename = "type")]
    pub app_type: AppType,

    #[serde(default = "default_port")]
    pub port: i32,

    #[serde(default = "default_context_path")]
    pub context_path: String,

    /// Arbitrary Spring configuration merged into `application.yaml`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_preset: Option<ResourcePreset>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceDefinition>,

    #[serde(default)]
    pub autoscaler: AutoscalerSpec,
}

fn default_port() -> i32 {
    DEFAULT_PORT
}

fn default_context_path() -> String {
    DEFAULT_CONTEXT_PATH.to_string()
}

fn default_min_replicas() -> i32 {
    DEFAULT_MIN_REPLICAS
}

fn default_max_replicas() -> i32 {
    DEFAULT_MAX_REPLICAS
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

impl SpringBootApplicationSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            app_type: AppType::default(),
            port: DEFAULT_PORT,
            context_path: default_context_path(),
            config: None,
            resource_preset: None,
            resources: None,
            autoscaler: AutoscalerSpec::default(),
        }
    }
}

/// Spring flavour of the workload. Drives autoscaling defaults.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    #[default]
    Web,
    Webflux,
    Native,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Web => "web",
            AppType::Webflux => "webflux",
            AppType::Native => "native",
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(AppType::Web),
            "webflux" => Ok(AppType::Webflux),
            "native" => Ok(AppType::Native),
            other => Err(Error::UnknownFramework(other.to_string())),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourcePreset {
    Small,
    Medium,
    Large,
}

impl ResourcePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourcePreset::Small => "small",
            ResourcePreset::Medium => "medium",
            ResourcePreset::Large => "large",
        }
    }
}

impl fmt::Display for ResourcePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourcePreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(ResourcePreset::Small),
            "medium" => Ok(ResourcePreset::Medium),
            "large" => Ok(ResourcePreset::Large),
            other => Err(Error::UnknownPreset(other.to_string())),
        }
    }
}

/// Explicit cpu and memory quantities, used instead of a preset.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ResourceDefinition {
    pub cpu: String,
    pub memory: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerSpec {
    #[serde(default = "default_min_replicas")]
    pub min_replicas: i32,

    #[serde(default = "default_max_replicas")]
    pub max_replicas: i32,

    #[serde(default)]
    pub target_utilization: TargetUtilization,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviour: Option<ScalingBehaviour>,
}

impl Default for AutoscalerSpec {
    fn default() -> Self {
        Self {
            min_replicas: DEFAULT_MIN_REPLICAS,
            max_replicas: DEFAULT_MAX_REPLICAS,
            target_utilization: TargetUtilization::default(),
            behaviour: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetUtilization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 100))]
    pub cpu_percentage: Option<i32>,
}

/// User override for the autoscaler's scaling behaviour.
///
/// Each block replaces the framework default as a whole when present.
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScalingBehaviour {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up: Option<ScalingRules>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down: Option<ScalingRules>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScalingRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stabilization_window_seconds: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_policy: Option<SelectPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<Vec<ScalingPolicy>>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum SelectPolicy {
    Max,
    Min,
    Disabled,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicy {
    #[serde(rename = "type")]
    pub policy_type: ScalingPolicyType,
    pub value: i32,
    pub period_seconds: i32,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ScalingPolicyType {
    Pods,
    Percent,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct SpringBootApplicationStatus {
    #[serde(default)]
    #[schemars(with = "Vec<crate::status::Condition>")]
    pub conditions: Conditions,
}
