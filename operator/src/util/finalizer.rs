use kube::{
    Api, Client,
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

use super::{Error, FINALIZER, MANAGER_NAME};

pub fn has_finalizer<T: Resource>(instance: &T) -> bool {
    instance
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == FINALIZER))
}

/// Adds the cleanup finalizer if missing. Applied before any external
/// side effect so a crash between the two cannot leak the child.
pub async fn add_finalizer<T>(client: Client, instance: &T) -> Result<(), Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource<Scope = NamespaceResourceScope>
        + Serialize
        + DeserializeOwned
        + Debug,
{
    if has_finalizer(instance) {
        return Ok(());
    }
    let mut finalizers = instance.meta().finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());
    patch_finalizers(client, instance, finalizers).await
}

/// Removes the cleanup finalizer, allowing Kubernetes to delete the
/// resource.
pub async fn remove_finalizer<T>(client: Client, instance: &T) -> Result<(), Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource<Scope = NamespaceResourceScope>
        + Serialize
        + DeserializeOwned
        + Debug,
{
    if !has_finalizer(instance) {
        return Ok(());
    }
    let finalizers: Vec<String> = instance
        .meta()
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();
    patch_finalizers(client, instance, finalizers).await
}

async fn patch_finalizers<T>(
    client: Client,
    instance: &T,
    finalizers: Vec<String>,
) -> Result<(), Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource<Scope = NamespaceResourceScope>
        + Serialize
        + DeserializeOwned
        + Debug,
{
    let name = instance
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.name".to_string()))?;
    let namespace = instance
        .meta()
        .namespace
        .as_deref()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.namespace".to_string()))?;
    let api: Api<T> = Api::namespaced(client, namespace);
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::apply(MANAGER_NAME), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
