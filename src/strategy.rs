//! Lifecycle hooks for image streams: what happens to a stream between the
//! client submitting it and the store persisting it.
//!
//! Create runs [`Strategy::prepare_for_create`] then [`Strategy::validate`];
//! update runs [`UpdateStrategy::prepare_for_update`] then
//! [`UpdateStrategy::validate_update`]. Validation authorizes cross-namespace
//! tags first, then reconciles changed tags into the status history, then
//! checks structure. Hooks mutate the caller's working copy; the caller only
//! persists it when the returned list is empty.

mod export;
mod generation;
pub mod resolver;
mod verifier;

#[cfg(test)]
mod tests;

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use futures::{future::BoxFuture, FutureExt};

use crate::{
    api::{
        add_tag_event, update_changed_tracking_tags, DockerImageReference, ImageStream,
        ImageStreamStatus, SourceError, TagEvent, TagReference, TagSource,
    },
    config::DefaultRegistry,
    error::Result,
    validation::{
        self,
        field::{ErrorList, FieldError, Path},
    },
};
use generation::{
    ensure_spec_tag_generations_are_set, finalize_spec_tag_generations, tag_ref_changed,
    update_observed_generation_for_status_update, update_spec_tag_generations_for_update,
};
pub use resolver::tag_reference_to_tag_event;
pub use verifier::{SubjectAccessReviewer, TagVerifier};

/// The namespace a stream lands in when created without one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The identity a request is made under.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub uid: String,
    pub groups: Vec<String>,
}

impl UserInfo {
    pub fn new(name: &str, groups: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            uid: String::new(),
            groups: groups.iter().map(|group| (*group).to_owned()).collect(),
        }
    }
}

/// Per-request values the hooks need.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub namespace: Option<String>,
    pub user: Option<UserInfo>,
}

impl RequestContext {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: Some(namespace.to_owned()),
            user: None,
        }
    }

    pub fn with_user(mut self, user: UserInfo) -> Self {
        self.user = Some(user);
        self
    }

    /// The request namespace, or `fallback` when the request carries none.
    pub fn namespace_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(fallback)
    }
}

/// Point lookups of other streams during tag resolution.
pub trait ImageStreamGetter: Send + Sync {
    fn get_image_stream<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ImageStream>>;
}

/// Admission check on the size of a stream, run before every write.
pub trait LimitVerifier: Send + Sync {
    fn verify_limits(&self, namespace: &str, stream: &ImageStream) -> Result<()>;
}

/// A [`LimitVerifier`] that admits everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLimits;

impl LimitVerifier for NoLimits {
    fn verify_limits(&self, _namespace: &str, _stream: &ImageStream) -> Result<()> {
        Ok(())
    }
}

/// The update half of a strategy, so one update path can serve spec, status
/// and internal writes.
pub trait UpdateStrategy: Send + Sync {
    fn prepare_for_update(&self, stream: &mut ImageStream, old: &ImageStream);

    fn validate_update<'a>(
        &'a self,
        ctx: &'a RequestContext,
        stream: &'a mut ImageStream,
        old: &'a ImageStream,
    ) -> BoxFuture<'a, ErrorList>;

    /// Whether the result is written through the status subresource.
    fn status_only(&self) -> bool {
        false
    }
}

/// Create and update behavior for end-user writes to image streams.
#[derive(Clone)]
pub struct Strategy {
    default_registry: Arc<dyn DefaultRegistry>,
    tag_verifier: TagVerifier,
    limit_verifier: Arc<dyn LimitVerifier>,
    image_stream_getter: Arc<dyn ImageStreamGetter>,
}

fn stream_path() -> Path {
    Path::new("imageStream")
}

impl Strategy {
    pub fn new(
        default_registry: Arc<dyn DefaultRegistry>,
        reviewer: Arc<dyn SubjectAccessReviewer>,
        limit_verifier: Arc<dyn LimitVerifier>,
        image_stream_getter: Arc<dyn ImageStreamGetter>,
    ) -> Self {
        Self {
            default_registry,
            tag_verifier: TagVerifier::new(reviewer),
            limit_verifier,
            image_stream_getter,
        }
    }

    /// Resets status, starts the generation at one and stamps it on every spec tag.
    pub fn prepare_for_create(&self, stream: &mut ImageStream) {
        stream.status = ImageStreamStatus {
            docker_image_repository: self.docker_image_repository(stream),
            tags: BTreeMap::new(),
        };
        stamp_initial_generation(stream);
    }

    pub async fn validate(&self, ctx: &RequestContext, stream: &mut ImageStream) -> ErrorList {
        self.validate_common(ctx, None, stream).await
    }

    /// Recomputes the derived status repository of a stream read from the store.
    pub fn decorate(&self, stream: &mut ImageStream) {
        stream.status.docker_image_repository = self.docker_image_repository(stream);
    }

    /// The stream's own external repository when it has one, otherwise
    /// `<registry>/<namespace>/<name>` if a default registry is known.
    fn docker_image_repository(&self, stream: &ImageStream) -> String {
        if !stream.spec.docker_image_repository.is_empty() {
            return stream.spec.docker_image_repository.clone();
        }
        let Some(registry) = self.default_registry.default_registry() else {
            return String::new();
        };
        let namespace = match stream.namespace() {
            "" => DEFAULT_NAMESPACE,
            namespace => namespace,
        };
        DockerImageReference {
            registry,
            namespace: namespace.to_owned(),
            name: stream.name().to_owned(),
            ..DockerImageReference::default()
        }
        .to_string()
    }

    fn prepare_for_update_with(&self, stream: &mut ImageStream, old: &ImageStream, reset_status: bool) {
        stream.set_generation(old.generation());
        if reset_status {
            stream.status = old.status.clone();
        }
        stream.status.docker_image_repository = self.docker_image_repository(stream);

        update_spec_tag_generations_for_update(stream, old);

        if old.spec != stream.spec || stream.generation() == 0 {
            stream.set_generation(old.generation() + 1);
        }

        // assigned afterwards so legacy objects without tag generations do not bump the stream
        ensure_spec_tag_generations_are_set(stream, Some(old));
    }

    async fn validate_common(
        &self,
        ctx: &RequestContext,
        old: Option<&ImageStream>,
        stream: &mut ImageStream,
    ) -> ErrorList {
        let Some(user) = &ctx.user else {
            return FieldError::forbidden(&stream_path(), stream.name()).into();
        };

        let denied = self.tag_verifier.denied_tags(old, stream, user).await;
        let skip: BTreeSet<String> = denied.keys().cloned().collect();
        let mut errs: ErrorList = denied.into_values().collect();
        errs.extend(self.tags_changed(old, stream, &skip).await);

        let namespace = ctx.namespace_or(stream.namespace()).to_owned();
        if let Err(err) = self.limit_verifier.verify_limits(&namespace, stream) {
            errs.push(FieldError::forbidden(&stream_path(), err.to_string()));
        }

        match old {
            None => errs.extend(validation::validate_image_stream(stream)),
            Some(old) => errs.extend(validation::validate_image_stream_update(stream, old)),
        }
        errs
    }

    /// Resolves every spec tag that changed relative to `old` into the status
    /// history. Every tag counts as changed when `old` is `None`. Tags in `skip`
    /// are left alone.
    pub(crate) async fn tags_changed(
        &self,
        old: Option<&ImageStream>,
        stream: &mut ImageStream,
        skip: &BTreeSet<String>,
    ) -> ErrorList {
        let mut errs = ErrorList::new();
        let mut resolved: Vec<(String, TagReference, TagEvent)> = Vec::new();

        for (tag, tag_ref) in &stream.spec.tags {
            if skip.contains(tag) {
                continue;
            }
            if let Some(old_ref) = old.and_then(|old| old.spec.tags.get(tag)) {
                if !tag_ref_changed(old_ref, tag_ref, stream.namespace()) {
                    continue;
                }
            }
            let Some(from) = &tag_ref.from else {
                continue;
            };

            log::debug!(
                "detected changed tag {tag} in {}/{}",
                stream.namespace(),
                stream.name()
            );

            let mut tag_ref = tag_ref.clone();
            tag_ref.generation = Some(stream.generation());
            let from_path = Path::new("spec").child("tags").key(tag).child("from");
            let from_name = tag_ref.from_name().to_owned();

            let source = match TagSource::parse(from, stream.name()) {
                Ok(source) => source,
                // a missing kind is reported by structural validation
                Err(SourceError::InvalidKind(kind)) if kind.is_empty() => continue,
                Err(err) => {
                    errs.push(FieldError::invalid(&from_path, from_name, err.to_string()));
                    continue;
                }
            };

            let event = match &source {
                TagSource::DockerImage { .. } => {
                    tag_reference_to_tag_event(stream, &tag_ref, &source)
                }
                TagSource::StreamTag { .. } | TagSource::StreamImage { .. } => {
                    let namespace = source.namespace_or(stream.namespace());
                    let name = source.stream().unwrap_or(stream.name());
                    if namespace == stream.namespace() && name == stream.name() {
                        tag_reference_to_tag_event(stream, &tag_ref, &source)
                    } else {
                        match self.image_stream_getter.get_image_stream(namespace, name).await {
                            Ok(other) => tag_reference_to_tag_event(&other, &tag_ref, &source),
                            Err(err) if err.is_not_found() => {
                                errs.push(FieldError::not_found(&from_path, from_name));
                                continue;
                            }
                            Err(err) => {
                                errs.push(FieldError::invalid(
                                    &from_path,
                                    from_name,
                                    format!("unable to retrieve image stream: {err}"),
                                ));
                                continue;
                            }
                        }
                    }
                }
            };

            match event {
                Ok(Some(event)) => resolved.push((tag.clone(), tag_ref, event)),
                // the referenced tag has no history yet
                Ok(None) => {}
                Err(err) if err.is_not_found() => {
                    errs.push(FieldError::not_found(&from_path, from_name));
                }
                Err(err) => errs.push(FieldError::invalid(
                    &from_path,
                    from_name,
                    format!("error generating tag event: {err}"),
                )),
            }
        }

        // use a consistent timestamp for events generated on creation
        let created = old
            .is_none()
            .then(|| stream.creation_timestamp().cloned())
            .flatten();
        let mut spec_tags = stream.spec.tags.clone();
        for (tag, tag_ref, mut event) in resolved {
            if let Some(created) = &created {
                event.created = created.clone();
            }
            add_tag_event(stream, &tag, event);
            spec_tags.insert(tag, tag_ref);
        }
        stream.spec.tags = spec_tags;
        finalize_spec_tag_generations(stream);

        update_changed_tracking_tags(stream, old);

        errs
    }
}

fn stamp_initial_generation(stream: &mut ImageStream) {
    stream.set_generation(1);
    for tag_ref in stream.spec.tags.values_mut() {
        tag_ref.generation = Some(1);
    }
}

impl UpdateStrategy for Strategy {
    fn prepare_for_update(&self, stream: &mut ImageStream, old: &ImageStream) {
        self.prepare_for_update_with(stream, old, true);
    }

    fn validate_update<'a>(
        &'a self,
        ctx: &'a RequestContext,
        stream: &'a mut ImageStream,
        old: &'a ImageStream,
    ) -> BoxFuture<'a, ErrorList> {
        self.validate_common(ctx, Some(old), stream).boxed()
    }
}

/// Writes to the status subresource. Spec changes are discarded.
#[derive(Clone)]
pub struct StatusStrategy(pub Strategy);

impl UpdateStrategy for StatusStrategy {
    fn prepare_for_update(&self, stream: &mut ImageStream, old: &ImageStream) {
        stream.spec.tags = old.spec.tags.clone();
        stream.spec.docker_image_repository = old.spec.docker_image_repository.clone();
        stream.set_generation(old.generation());

        update_observed_generation_for_status_update(stream, old);
    }

    fn validate_update<'a>(
        &'a self,
        ctx: &'a RequestContext,
        stream: &'a mut ImageStream,
        old: &'a ImageStream,
    ) -> BoxFuture<'a, ErrorList> {
        async move {
            let mut errs = ErrorList::new();
            let namespace = ctx.namespace_or(stream.namespace()).to_owned();
            if let Err(err) = self.0.limit_verifier.verify_limits(&namespace, stream) {
                errs.push(FieldError::forbidden(&stream_path(), err.to_string()));
            }
            errs.extend(validation::validate_image_stream_status_update(stream, old));
            errs
        }
        .boxed()
    }

    fn status_only(&self) -> bool {
        true
    }
}

/// Writes from trusted controllers, which may change spec and status together.
#[derive(Clone)]
pub struct InternalStrategy(pub Strategy);

impl InternalStrategy {
    /// Like [`Strategy::prepare_for_create`], but keeps the submitted status.
    pub fn prepare_for_create(&self, stream: &mut ImageStream) {
        stream.status.docker_image_repository = self.0.docker_image_repository(stream);
        stamp_initial_generation(stream);
    }
}

impl UpdateStrategy for InternalStrategy {
    fn prepare_for_update(&self, stream: &mut ImageStream, old: &ImageStream) {
        self.0.prepare_for_update_with(stream, old, false);
    }

    fn validate_update<'a>(
        &'a self,
        ctx: &'a RequestContext,
        stream: &'a mut ImageStream,
        old: &'a ImageStream,
    ) -> BoxFuture<'a, ErrorList> {
        self.0.validate_update(ctx, stream, old)
    }
}
