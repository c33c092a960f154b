use k8s_openapi::{
    api::core::v1::{Event as CoreEvent, ObjectReference},
    apimachinery::pkg::apis::meta::v1::Time,
    jiff::Timestamp,
};
use kube::{
    Api, Client,
    api::{ObjectMeta, PostParams, Resource},
};

use super::{Error, MANAGER_NAME};

/// Publishes a Warning event against the given resource so that user
/// failures show up in `kubectl describe`.
pub async fn publish_warning<T>(
    client: Client,
    instance: &T,
    reason: &str,
    message: &str,
) -> Result<(), Error>
where
    T: Resource,
    <T as Resource>::DynamicType: Default,
{
    let name = instance
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.name".to_string()))?;
    let namespace = instance
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.namespace".to_string()))?;
    let now = Time::from(Timestamp::now());
    let event = CoreEvent {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", name)),
            namespace: Some(namespace.clone()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some(T::api_version(&Default::default()).into_owned()),
            kind: Some(T::kind(&Default::default()).into_owned()),
            name: Some(name),
            namespace: Some(namespace.clone()),
            uid: instance.meta().uid.clone(),
            ..Default::default()
        },
        type_: Some("Warning".to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        first_timestamp: Some(now.clone()),
        last_timestamp: Some(now),
        count: Some(1),
        reporting_component: Some(MANAGER_NAME.to_string()),
        ..Default::default()
    };
    let api: Api<CoreEvent> = Api::namespaced(client, &namespace);
    api.create(&PostParams::default(), &event).await?;
    Ok(())
}
