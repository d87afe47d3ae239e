//! The image stream endpoint: every write runs the strategy hooks on a working
//! copy and persists it only if the accumulated error list is empty.

use std::sync::Arc;

use futures::{stream::BoxStream, StreamExt};
use kube_core::WatchEvent;

use crate::{
    api::{now, ImageStream},
    error::{Error, Result},
    store::ImageStreamStore,
    strategy::{InternalStrategy, RequestContext, StatusStrategy, Strategy, UpdateStrategy},
    validation::field::{FieldError, Path},
};

const KIND: &str = "ImageStream";

pub struct ImageStreamRegistry {
    store: Arc<dyn ImageStreamStore>,
    strategy: Strategy,
    status: StatusStrategy,
    internal: InternalStrategy,
}

impl ImageStreamRegistry {
    pub fn new(store: Arc<dyn ImageStreamStore>, strategy: Strategy) -> Self {
        Self {
            store,
            status: StatusStrategy(strategy.clone()),
            internal: InternalStrategy(strategy.clone()),
            strategy,
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub(crate) fn store(&self) -> &Arc<dyn ImageStreamStore> {
        &self.store
    }

    pub async fn create(&self, ctx: &RequestContext, stream: ImageStream) -> Result<ImageStream> {
        let mut stream = prepare_new(ctx, stream)?;
        self.strategy.prepare_for_create(&mut stream);
        self.persist_new(ctx, stream).await
    }

    /// Creates a stream keeping the submitted status, for trusted controllers.
    pub async fn create_internal(
        &self,
        ctx: &RequestContext,
        stream: ImageStream,
    ) -> Result<ImageStream> {
        let mut stream = prepare_new(ctx, stream)?;
        self.internal.prepare_for_create(&mut stream);
        self.persist_new(ctx, stream).await
    }

    async fn persist_new(&self, ctx: &RequestContext, mut stream: ImageStream) -> Result<ImageStream> {
        let errs = self.strategy.validate(ctx, &mut stream).await;
        if !errs.is_empty() {
            return Err(Error::invalid(KIND, stream.name(), errs));
        }
        let mut created = self.store.create(stream).await?;
        self.strategy.decorate(&mut created);
        Ok(created)
    }

    /// Replaces the spec. Changed spec tags are resolved into the status history.
    pub async fn update(&self, ctx: &RequestContext, stream: ImageStream) -> Result<ImageStream> {
        self.update_with(ctx, stream, &self.strategy).await
    }

    /// Replaces the status. Spec changes in `stream` are discarded.
    pub async fn update_status(
        &self,
        ctx: &RequestContext,
        stream: ImageStream,
    ) -> Result<ImageStream> {
        self.update_with(ctx, stream, &self.status).await
    }

    /// Replaces spec and status together, for trusted controllers.
    pub async fn update_internal(
        &self,
        ctx: &RequestContext,
        stream: ImageStream,
    ) -> Result<ImageStream> {
        self.update_with(ctx, stream, &self.internal).await
    }

    async fn update_with(
        &self,
        ctx: &RequestContext,
        mut stream: ImageStream,
        strategy: &dyn UpdateStrategy,
    ) -> Result<ImageStream> {
        set_request_namespace(ctx, &mut stream)?;
        if stream.metadata.resource_version.as_deref().unwrap_or_default().is_empty() {
            let errs = FieldError::required(
                &Path::new("metadata").child("resourceVersion"),
                "must be specified for an update",
            )
            .into();
            return Err(Error::invalid(KIND, stream.name(), errs));
        }

        let old = self.store.get(stream.namespace(), stream.name()).await?;
        strategy.prepare_for_update(&mut stream, &old);
        let errs = strategy.validate_update(ctx, &mut stream, &old).await;
        if !errs.is_empty() {
            return Err(Error::invalid(KIND, stream.name(), errs));
        }

        let mut updated = if strategy.status_only() {
            self.store.update_status(stream).await?
        } else {
            self.store.update(stream).await?
        };
        self.strategy.decorate(&mut updated);
        Ok(updated)
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Result<ImageStream> {
        let mut stream = self.store.get(namespace, name).await?;
        self.strategy.decorate(&mut stream);
        Ok(stream)
    }

    pub async fn list(&self, namespace: Option<&str>) -> Result<Vec<ImageStream>> {
        let mut streams = self.store.list(namespace).await?;
        for stream in &mut streams {
            self.strategy.decorate(stream);
        }
        Ok(streams)
    }

    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.store.delete(namespace, name).await
    }

    /// Decorated changes to the streams of `namespace`, optionally just `name`.
    pub fn watch(
        &self,
        namespace: Option<String>,
        name: Option<String>,
    ) -> BoxStream<'static, Result<WatchEvent<ImageStream>>> {
        let strategy = self.strategy.clone();
        self.store
            .watch(namespace, name)
            .map(move |event| {
                event.map(|event| match event {
                    WatchEvent::Added(mut stream) => {
                        strategy.decorate(&mut stream);
                        WatchEvent::Added(stream)
                    }
                    WatchEvent::Modified(mut stream) => {
                        strategy.decorate(&mut stream);
                        WatchEvent::Modified(stream)
                    }
                    other => other,
                })
            })
            .boxed()
    }
}

fn set_request_namespace(ctx: &RequestContext, stream: &mut ImageStream) -> Result<()> {
    let Some(namespace) = ctx.namespace.as_deref() else {
        return Ok(());
    };
    if stream.namespace().is_empty() {
        stream.metadata.namespace = Some(namespace.to_owned());
    } else if stream.namespace() != namespace {
        return Err(Error::BadRequest(
            "the namespace of the provided object does not match the namespace sent on the request"
                .to_owned(),
        ));
    }
    Ok(())
}

fn prepare_new(ctx: &RequestContext, mut stream: ImageStream) -> Result<ImageStream> {
    set_request_namespace(ctx, &mut stream)?;
    stream.metadata.resource_version = None;
    stream.metadata.uid = None;
    if stream.metadata.creation_timestamp.is_none() {
        stream.metadata.creation_timestamp = Some(now());
    }
    Ok(stream)
}
