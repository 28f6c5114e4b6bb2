//! Rendering of the `application.yaml` handed to the Spring container.
//!
//! User supplied configuration is taken as-is, except for the keys the
//! operator has to own for the rest of the workload to line up: the server
//! port (probes, service and container port all point at it) and the servlet
//! context path.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Key of the rendered file inside the ConfigMap.
pub const CONFIG_FILE_KEY: &str = "application.yaml";

/// Merges `raw` with the port and context path from the spec and renders it as YAML.
///
/// A root context path (`""` or `"/"`) is Spring's own default and is left out
/// of the rendered file.
pub fn render_config(raw: Option<&Value>, port: i32, context_path: &str) -> Result<String> {
    let mut merged: Map<String, Value> = match raw {
        None | Some(Value::Null) => Map::new(),
        Some(value) => serde_json::from_value(value.clone()).map_err(Error::Decode)?,
    };

    let mut server = take_mapping(&mut merged, "server");
    server.insert("port".to_string(), Value::from(port));

    if !is_root_path(context_path) {
        let mut servlet = take_mapping(&mut server, "servlet");
        servlet.insert("context-path".to_string(), Value::from(context_path));
        server.insert("servlet".to_string(), Value::Object(servlet));
    }

    merged.insert("server".to_string(), Value::Object(server));
    Ok(serde_yaml::to_string(&merged)?)
}

fn is_root_path(context_path: &str) -> bool {
    context_path.is_empty() || context_path == "/"
}

// A non-mapping value under `key` is dropped in favour of an empty mapping.
fn take_mapping(parent: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match parent.remove(key) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
