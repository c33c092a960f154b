use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    Api,
    api::{ObjectMeta, PostParams, Resource},
};
use kubernaut_types::*;
use std::collections::BTreeMap;

use crate::context::Context;
use crate::util::{self, Error};

/// Creates an escalation NotificationRequest about another resource.
///
/// The subject is linked through annotations rather than only the owner
/// reference so consumers can find it without walking the owner chain,
/// and the owner reference never blocks deletion: notifications are
/// deleted independently by the user.
pub async fn escalate<T>(
    ctx: &Context,
    subject: &T,
    correlation_id: &str,
    summary: &str,
    body: &str,
) -> Result<(), Error>
where
    T: Resource<DynamicType = ()>,
{
    let namespace = subject
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| Error::UserInput("subject is missing metadata.namespace".to_string()))?;
    let subject_kind = T::kind(&()).into_owned();
    let subject_name = subject
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("subject is missing metadata.name".to_string()))?;
    let owner_ref = subject.controller_owner_ref(&()).map(|r| OwnerReference {
        controller: Some(false),
        block_owner_deletion: Some(false),
        ..r
    });

    let notification = NotificationRequest {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-escalation-", subject_name)),
            namespace: Some(namespace.clone()),
            owner_references: owner_ref.map(|r| vec![r]),
            annotations: Some(BTreeMap::from([
                (
                    kubernaut_common::annotations::CREATED_BY.to_string(),
                    util::MANAGER_NAME.to_string(),
                ),
                (
                    kubernaut_common::annotations::SUBJECT_KIND.to_string(),
                    subject_kind,
                ),
                (
                    kubernaut_common::annotations::SUBJECT_NAME.to_string(),
                    subject_name,
                ),
            ])),
            ..Default::default()
        },
        spec: NotificationRequestSpec {
            notification_type: NotificationType::Escalation,
            priority: BusinessPriority::High,
            subject: summary.to_string(),
            body: body.to_string(),
            recipients: Vec::new(),
            channels: vec![NotificationChannel {
                name: "console".to_string(),
                kind: ChannelKind::Console,
                secret_ref: None,
            }],
            retry_policy: None,
            correlation_id: correlation_id.to_string(),
        },
        status: None,
    };
    let api: Api<NotificationRequest> = Api::namespaced(ctx.client.clone(), &namespace);
    api.create(&PostParams::default(), &notification).await?;
    Ok(())
}
