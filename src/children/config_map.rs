use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use super::child_meta;
use crate::{app_config::CONFIG_FILE_KEY, crd::SpringBootApplication, error::Result};

/// ConfigMap carrying the rendered `application.yaml`.
pub fn build(app: &SpringBootApplication, rendered: &str) -> Result<ConfigMap> {
    Ok(ConfigMap {
        metadata: child_meta(app)?,
        data: Some(BTreeMap::from([(
            CONFIG_FILE_KEY.to_string(),
            rendered.to_string(),
        )])),
        ..Default::default()
    })
}
