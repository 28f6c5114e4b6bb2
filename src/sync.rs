//! Create-or-update of a single owned object.

use std::future::Future;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::{
    children::Child,
    crd::SpringBootApplication,
    error::{Error, Result},
    store::{ObjectKey, ObjectStore},
};

/// Hash of the labels and owned fields last written to a child.
pub const APPLIED_HASH_ANNOTATION: &str = "spring.dante-lor.github.io/applied-hash";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Races a store call against cancellation.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = operation => result,
    }
}

/// Brings the child named after `app` in line with what `build` produces.
///
/// Labels and the fields listed in [`Child::OWNED_FIELDS`] are replaced
/// wholesale, so anything `build` stops producing disappears from the stored
/// object. The rest of the object (status, annotations added by other tools,
/// replicas set by the autoscaler) is kept. Nothing is written when the
/// desired state was already applied and the stored object still matches it.
#[instrument(skip_all, fields(kind = %K::kind(&()), name = %app.name_any()))]
pub async fn sync_child<S, K, F>(
    store: &S,
    cancel: &CancellationToken,
    app: &SpringBootApplication,
    build: F,
) -> Result<SyncOutcome>
where
    S: ObjectStore,
    K: Child,
    F: FnOnce(&SpringBootApplication) -> Result<K>,
{
    let key = ObjectKey::of(app)?;
    let current: Option<K> = cancellable(cancel, store.get(&key)).await?;
    let mut desired = build(app)?;
    let owner = owner_reference(app)?;
    let applied = applied_hash(&desired)?;

    let Some(current) = current else {
        set_applied_hash(&mut desired, applied);
        set_owner(&mut desired, owner);
        cancellable(cancel, store.create(&desired)).await?;
        info!("created");
        return Ok(SyncOutcome::Created);
    };

    if is_applied(&current, &desired, &applied)? && is_controlled_by(&current, &owner) {
        debug!("up to date");
        return Ok(SyncOutcome::Unchanged);
    }

    desired.keep_managed_elsewhere(&current);
    let mut updated = replace_owned(&current, &desired)?;
    set_applied_hash(&mut updated, applied);
    set_owner(&mut updated, owner);

    cancellable(cancel, store.update(&updated)).await?;
    info!("updated");
    Ok(SyncOutcome::Updated)
}

/// Controller reference pointing at `app`, used for cascading deletion.
pub fn owner_reference(app: &SpringBootApplication) -> Result<OwnerReference> {
    app.controller_owner_ref(&())
        .ok_or(Error::MissingField("metadata.uid"))
}

/// Makes `owner` the single controller of `child`, keeping non-controller references.
pub fn set_owner<K: Resource>(child: &mut K, owner: OwnerReference) {
    let references = child.meta_mut().owner_references.get_or_insert_with(Vec::new);
    references.retain(|r| r.uid != owner.uid && r.controller != Some(true));
    references.push(owner);
}

/// Sha256 over the labels and owned fields of `desired`, in hex.
pub fn applied_hash<K: Child>(desired: &K) -> Result<String> {
    let desired = serde_json::to_value(desired)?;

    let mut hasher = Sha256::new();
    hasher.update(desired["metadata"]["labels"].to_string());
    for field in K::OWNED_FIELDS {
        hasher.update(field.as_bytes());
        hasher.update(desired[*field].to_string());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn set_applied_hash<K: Resource>(child: &mut K, hash: String) {
    child
        .meta_mut()
        .annotations
        .get_or_insert_with(Default::default)
        .insert(APPLIED_HASH_ANNOTATION.to_string(), hash);
}

// Our last write matches `desired` and nobody has changed an owned value since.
// Owned fields are compared by containment so server defaults do not count.
fn is_applied<K: Child>(current: &K, desired: &K, applied: &str) -> Result<bool> {
    let hash = current.annotations().get(APPLIED_HASH_ANNOTATION);
    if hash.map(String::as_str) != Some(applied) || current.labels() != desired.labels() {
        return Ok(false);
    }

    let current = serde_json::to_value(current)?;
    let desired = serde_json::to_value(desired)?;
    Ok(K::OWNED_FIELDS
        .iter()
        .all(|field| contains(&current[*field], &desired[*field])))
}

/// `current` with its labels and owned fields taken from `desired`.
fn replace_owned<K: Child>(current: &K, desired: &K) -> Result<K> {
    let mut merged = serde_json::to_value(current)?;
    let owned = serde_json::to_value(desired)?;

    if let Value::Object(object) = &mut merged {
        for field in K::OWNED_FIELDS {
            match owned.get(*field) {
                Some(value) if !value.is_null() => {
                    object.insert(field.to_string(), value.clone());
                }
                _ => {
                    object.remove(*field);
                }
            }
        }
    }

    let mut merged: K = serde_json::from_value(merged)?;
    merged.meta_mut().labels = desired.meta().labels.clone();
    Ok(merged)
}

fn is_controlled_by<K: Resource>(child: &K, owner: &OwnerReference) -> bool {
    let controllers: Vec<_> = child
        .owner_references()
        .iter()
        .filter(|r| r.controller == Some(true))
        .collect();
    controllers.len() == 1 && controllers[0] == owner
}

/// Whether every field set in `expected` has the same value in `actual`.
///
/// Objects are compared key by key so fields defaulted by the server do not
/// count as drift. Arrays must match element for element.
fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => {
            expected.iter().all(|(key, value)| match actual.get(key) {
                Some(found) => contains(found, value),
                None => is_empty(value),
            })
        }
        (Value::Array(actual), Value::Array(expected)) => {
            actual.len() == expected.len()
                && actual.iter().zip(expected).all(|(a, e)| contains(a, e))
        }
        _ => actual == expected,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
