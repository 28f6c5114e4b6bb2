use std::{collections::BTreeMap, sync::LazyLock};

use k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity,
};
use regex::Regex;

use crate::{
    crd::{ResourcePreset, SpringBootApplicationSpec},
    error::{Error, Result},
};

// Kubernetes quantity grammar: signed decimal with an optional binary SI,
// decimal SI or exponent suffix.
static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([KMGTPE]i|[numkMGTPE]|[eE][+-]?\d+)?$")
        .expect("quantity pattern is valid")
});

/// Resolves the container requirements from the preset or the explicit quantities.
///
/// CPU only gets a request so bursts are not throttled. Memory gets a limit
/// equal to its request so the node is never overcommitted.
pub fn resolve(spec: &SpringBootApplicationSpec) -> Result<ResourceRequirements> {
    let (cpu, memory) = match (spec.resource_preset, &spec.resources) {
        (Some(preset), _) => preset_quantities(preset),
        (None, Some(resources)) => (
            parse_quantity("cpu", &resources.cpu)?,
            parse_quantity("memory", &resources.memory)?,
        ),
        (None, None) => return Err(Error::MissingResources),
    };

    Ok(requirements(cpu, memory))
}

pub fn preset_quantities(preset: ResourcePreset) -> (Quantity, Quantity) {
    let (cpu, memory) = match preset {
        ResourcePreset::Small => ("1", "1Gi"),
        ResourcePreset::Medium => ("2", "2Gi"),
        ResourcePreset::Large => ("4", "4Gi"),
    };
    (Quantity(cpu.to_string()), Quantity(memory.to_string()))
}

pub fn parse_quantity(field: &'static str, value: &str) -> Result<Quantity> {
    if QUANTITY.is_match(value) {
        Ok(Quantity(value.to_string()))
    } else {
        Err(Error::QuantityParse {
            field,
            value: value.to_string(),
        })
    }
}

fn requirements(cpu: Quantity, memory: Quantity) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), cpu),
            ("memory".to_string(), memory.clone()),
        ])),
        limits: Some(BTreeMap::from([("memory".to_string(), memory)])),
        ..Default::default()
    }
}
