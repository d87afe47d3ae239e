use std::{collections::BTreeMap, sync::Arc};

use futures::future::BoxFuture;
use k8s_openapi::{
    api::authorization::v1::{ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

use super::{generation::tag_ref_changed, UserInfo};
use crate::{
    api::{ImageStream, TagSource, GROUP_NAME},
    error::Result,
    validation::field::{ErrorList, FieldError, Path},
};

/// Answers whether a subject may perform an action.
pub trait SubjectAccessReviewer: Send + Sync {
    /// Submits `review` and returns it with its status filled in.
    fn review(&self, review: SubjectAccessReview) -> BoxFuture<'_, Result<SubjectAccessReview>>;
}

impl<R: SubjectAccessReviewer + ?Sized> SubjectAccessReviewer for Arc<R> {
    fn review(&self, review: SubjectAccessReview) -> BoxFuture<'_, Result<SubjectAccessReview>> {
        (**self).review(review)
    }
}

/// Authorizes spec tags that read image streams in other namespaces.
#[derive(Clone)]
pub struct TagVerifier {
    reviewer: Arc<dyn SubjectAccessReviewer>,
}

impl TagVerifier {
    pub fn new(reviewer: Arc<dyn SubjectAccessReviewer>) -> Self {
        Self { reviewer }
    }

    /// Checks every new or changed cross-namespace tag and returns all denials.
    pub async fn verify(
        &self,
        old: Option<&ImageStream>,
        stream: &ImageStream,
        user: &UserInfo,
    ) -> ErrorList {
        self.denied_tags(old, stream, user)
            .await
            .into_values()
            .collect()
    }

    /// Like [`verify`](Self::verify), keyed by the rejected tag.
    pub(crate) async fn denied_tags(
        &self,
        old: Option<&ImageStream>,
        stream: &ImageStream,
        user: &UserInfo,
    ) -> BTreeMap<String, FieldError> {
        let mut denied = BTreeMap::new();
        for (tag, tag_ref) in &stream.spec.tags {
            let Some(from) = &tag_ref.from else {
                continue;
            };
            let from_namespace = from.namespace.as_deref().unwrap_or_default();
            if from_namespace.is_empty() || from_namespace == stream.namespace() {
                continue;
            }
            if let Some(old_ref) = old.and_then(|old| old.spec.tags.get(tag)) {
                if !tag_ref_changed(old_ref, tag_ref, stream.namespace()) {
                    continue;
                }
            }

            let from_path = Path::new("spec").child("tags").key(tag).child("from");
            let stream_name = match TagSource::parse(from, stream.name()) {
                Ok(source) => match source.stream() {
                    Some(name) => name.to_owned(),
                    None => {
                        denied.insert(tag.clone(), invalid_from_name(&from_path, tag_ref.from_name()));
                        continue;
                    }
                },
                Err(_) => {
                    denied.insert(tag.clone(), invalid_from_name(&from_path, tag_ref.from_name()));
                    continue;
                }
            };

            log::debug!(
                "performing subject access review for user={}, groups={:?} to {from_namespace}/{stream_name}",
                user.name,
                user.groups
            );
            let review = access_review(user, from_namespace, &stream_name);
            let allowed = match self.reviewer.review(review).await {
                Ok(resp) => resp.status.is_some_and(|status| status.allowed),
                Err(err) => {
                    log::debug!("subject access review to {from_namespace}/{stream_name} failed: {err}");
                    false
                }
            };
            if !allowed {
                denied.insert(
                    tag.clone(),
                    FieldError::forbidden(&from_path, format!("{from_namespace}/{stream_name}")),
                );
            }
        }
        denied
    }
}

fn invalid_from_name(from_path: &Path, name: &str) -> FieldError {
    FieldError::invalid(
        &from_path.child("name"),
        name,
        "must be of the form <tag>, <repo>:<tag>, <id>, or <repo>@<id>",
    )
}

fn access_review(user: &UserInfo, namespace: &str, stream_name: &str) -> SubjectAccessReview {
    SubjectAccessReview {
        metadata: ObjectMeta::default(),
        spec: SubjectAccessReviewSpec {
            resource_attributes: Some(ResourceAttributes {
                group: Some(GROUP_NAME.to_owned()),
                namespace: Some(namespace.to_owned()),
                resource: Some("imagestreams".to_owned()),
                name: Some(stream_name.to_owned()),
                verb: Some("get".to_owned()),
                ..ResourceAttributes::default()
            }),
            user: Some(user.name.clone()),
            groups: Some(user.groups.clone()),
            uid: (!user.uid.is_empty()).then(|| user.uid.clone()),
            ..SubjectAccessReviewSpec::default()
        },
        status: None,
    }
}
