//! Fakes and fixtures shared by the unit tests.

use std::sync::Arc;

use futures::{future::BoxFuture, FutureExt};
use k8s_openapi::api::authorization::v1::{SubjectAccessReview, SubjectAccessReviewStatus};
use parking_lot::Mutex;

use crate::{
    api::{Image, ImageStream, TagEvent, TagEventList},
    config::{Backoff, StaticRegistry},
    error::{Error, Result},
    store::MemoryStore,
    strategy::{
        ImageStreamGetter, LimitVerifier, NoLimits, RequestContext, Strategy,
        SubjectAccessReviewer, UserInfo,
    },
    Storage,
};

pub const REGISTRY: &str = "registry.example.com:5000";

/// A digest-shaped image name starting with `suffix`.
pub fn digest(suffix: &str) -> String {
    format!("sha256:{suffix:0<64}")
}

pub fn image(suffix: &str) -> Image {
    let name = digest(suffix);
    Image::new(&name, &format!("registry.example.com/library/app@{name}"))
}

pub fn event(suffix: &str) -> TagEvent {
    let image = image(suffix);
    TagEvent::new(&image.docker_image_reference, image.name())
}

/// Seeds a status history, newest first.
pub fn with_history(mut stream: ImageStream, tag: &str, events: Vec<TagEvent>) -> ImageStream {
    stream.status.tags.insert(
        tag.to_owned(),
        TagEventList {
            items: events,
            conditions: Vec::new(),
        },
    );
    stream
}

pub fn user() -> UserInfo {
    UserInfo::new("alice", &["system:authenticated"])
}

pub fn ctx(namespace: &str) -> RequestContext {
    RequestContext::new(namespace).with_user(user())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Allow,
    Deny,
    Fail,
}

/// Answers reviews from a fixed rule and remembers every review it saw.
pub struct Reviewer {
    mode: Mode,
    allowed: Vec<String>,
    reviews: Mutex<Vec<SubjectAccessReview>>,
}

impl Reviewer {
    fn with_mode(mode: Mode, allowed: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            mode,
            allowed: allowed.iter().map(|key| (*key).to_owned()).collect(),
            reviews: Mutex::new(Vec::new()),
        })
    }

    pub fn allow_all() -> Arc<Self> {
        Self::with_mode(Mode::Allow, &[])
    }

    pub fn deny_all() -> Arc<Self> {
        Self::with_mode(Mode::Deny, &[])
    }

    /// Allows only the listed `namespace/stream` pairs.
    pub fn allowing(allowed: &[&str]) -> Arc<Self> {
        Self::with_mode(Mode::Deny, allowed)
    }

    pub fn failing() -> Arc<Self> {
        Self::with_mode(Mode::Fail, &[])
    }

    pub fn reviews(&self) -> Vec<SubjectAccessReview> {
        self.reviews.lock().clone()
    }
}

impl SubjectAccessReviewer for Reviewer {
    fn review(&self, mut review: SubjectAccessReview) -> BoxFuture<'_, Result<SubjectAccessReview>> {
        self.reviews.lock().push(review.clone());
        let key = review
            .spec
            .resource_attributes
            .as_ref()
            .map(|attrs| {
                format!(
                    "{}/{}",
                    attrs.namespace.as_deref().unwrap_or_default(),
                    attrs.name.as_deref().unwrap_or_default()
                )
            })
            .unwrap_or_default();
        let result = match self.mode {
            Mode::Fail => Err(Error::Internal("authorizer unavailable".to_owned())),
            mode => {
                review.status = Some(SubjectAccessReviewStatus {
                    allowed: mode == Mode::Allow || self.allowed.contains(&key),
                    ..SubjectAccessReviewStatus::default()
                });
                Ok(review)
            }
        };
        async move { result }.boxed()
    }
}

/// Rejects streams with more than the given number of spec tags.
pub struct MaxTags(pub usize);

impl LimitVerifier for MaxTags {
    fn verify_limits(&self, namespace: &str, stream: &ImageStream) -> Result<()> {
        if stream.spec.tags.len() > self.0 {
            return Err(Error::Forbidden(format!(
                "{namespace}/{} exceeds the limit of {} tags",
                stream.name(),
                self.0
            )));
        }
        Ok(())
    }
}

/// A strategy resolving against `store`, with the default registry configured.
pub fn strategy(store: &Arc<MemoryStore>, reviewer: Arc<Reviewer>) -> Strategy {
    Strategy::new(
        Arc::new(StaticRegistry::new(REGISTRY)),
        reviewer,
        Arc::new(NoLimits),
        Arc::clone(store) as Arc<dyn ImageStreamGetter>,
    )
}

/// Every endpoint over one in-memory store, retrying without delay.
pub fn storage(store: &Arc<MemoryStore>, reviewer: Arc<Reviewer>) -> Storage {
    crate::config(StaticRegistry::new(REGISTRY), reviewer)
        .with_backoff(Backoff::immediate(4))
        .build(Arc::clone(store), Arc::clone(store) as Arc<dyn crate::store::ImageStore>)
}
