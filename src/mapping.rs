//! `ImageStreamMapping` create: registers an image and appends it to a stream
//! tag in one call, retrying lost optimistic writes that did not touch the tag.


use std::sync::Arc;

use crate::{
    api::{
        add_tag_event, latest_tagged_image, update_tracking_tags, ImageStream, ImageStreamMapping,
        TagEvent, DEFAULT_IMAGE_TAG,
    },
    config::Backoff,
    error::{Error, Result},
    registry::ImageStreamRegistry,
    store::ImageStore,
    strategy::RequestContext,
    validation::{
        field::{FieldError, Path},
        validate_image_stream_mapping,
    },
};

const KIND: &str = "ImageStreamMapping";

/// Where one write attempt left off.
enum Outcome {
    /// The tag holds the image, with or without a write.
    Done(ImageStream),
    /// The write lost a race that left the tag untouched; try again on `latest`.
    Retry { latest: ImageStream, err: Error },
    Failed(Error),
}

pub struct ImageStreamMappingRest {
    images: Arc<dyn ImageStore>,
    streams: Arc<ImageStreamRegistry>,
    backoff: Backoff,
}

impl ImageStreamMappingRest {
    pub fn new(
        images: Arc<dyn ImageStore>,
        streams: Arc<ImageStreamRegistry>,
        backoff: Backoff,
    ) -> Self {
        Self {
            images,
            streams,
            backoff,
        }
    }

    /// Creates the mapped image if it is new and makes it the head of the
    /// target tag. Returns the stream as last written or read.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        mut mapping: ImageStreamMapping,
    ) -> Result<ImageStream> {
        if mapping.namespace().is_empty() {
            mapping.metadata.namespace = ctx.namespace.clone();
        }
        let errs = validate_image_stream_mapping(&mapping);
        if !errs.is_empty() {
            return Err(Error::invalid(KIND, mapping.name(), errs));
        }

        let mut stream = self.find_stream_for_mapping(&mapping).await?;
        let tag = match mapping.tag.as_str() {
            "" => DEFAULT_IMAGE_TAG,
            tag => tag,
        };

        match self.images.create_image(mapping.image.clone()).await {
            Ok(_) => {}
            Err(err) if err.is_already_exists() => {}
            Err(err) => return Err(err),
        }
        let next = TagEvent::new(&mapping.image.docker_image_reference, mapping.image.name());

        let mut delays = self.backoff.delays();
        loop {
            match self.attempt(ctx, &mapping, tag, stream, &next).await {
                Outcome::Done(stream) => return Ok(stream),
                Outcome::Failed(err) => return Err(err),
                Outcome::Retry { latest, err } => match delays.next() {
                    Some(delay) => {
                        log::trace!(
                            "retrying mapping of {} to {}/{}:{tag} in {delay:?}",
                            next.image,
                            latest.namespace(),
                            latest.name()
                        );
                        tokio::time::sleep(delay).await;
                        stream = latest;
                    }
                    None => {
                        log::warn!(
                            "giving up mapping {} to {}/{}:{tag} after {} attempts: {err}",
                            next.image,
                            latest.namespace(),
                            latest.name(),
                            self.backoff.steps
                        );
                        return Err(err);
                    }
                },
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &RequestContext,
        mapping: &ImageStreamMapping,
        tag: &str,
        mut stream: ImageStream,
        next: &TagEvent,
    ) -> Outcome {
        let last = latest_tagged_image(&stream, tag).cloned();
        let unchanged = last.as_ref().is_some_and(|head| {
            head.image == next.image && head.docker_image_reference == next.docker_image_reference
        });
        if unchanged || !add_tag_event(&mut stream, tag, next.clone()) {
            return Outcome::Done(stream);
        }
        update_tracking_tags(&mut stream, tag, next);

        let err = match self.streams.update_status(ctx, stream).await {
            Ok(updated) => return Outcome::Done(updated),
            Err(err) if err.is_conflict() => err,
            Err(err) => return Outcome::Failed(err),
        };

        let latest = match self.find_stream_for_mapping(mapping).await {
            Ok(latest) => latest,
            Err(err) => return Outcome::Failed(err),
        };
        let newer = latest_tagged_image(&latest, tag);
        if last.is_none() || last.as_ref() == newer {
            Outcome::Retry { latest, err }
        } else {
            log::trace!(
                "tag {tag} of {}/{} changed concurrently, not retrying",
                latest.namespace(),
                latest.name()
            );
            Outcome::Failed(err)
        }
    }

    /// The stream named by the mapping, or else the first stream in the
    /// namespace serving the mapping's repository.
    async fn find_stream_for_mapping(&self, mapping: &ImageStreamMapping) -> Result<ImageStream> {
        let namespace = mapping.namespace();
        if !mapping.name().is_empty() {
            return self.streams.get(namespace, mapping.name()).await;
        }

        let repository = &mapping.docker_image_repository;
        if repository.is_empty() {
            return Err(Error::not_found("imagestreams", ""));
        }
        let mut streams = self.streams.list(Some(namespace)).await?;
        let by_spec = streams
            .iter()
            .position(|stream| &stream.spec.docker_image_repository == repository);
        let by_status = || {
            streams
                .iter()
                .position(|stream| &stream.status.docker_image_repository == repository)
        };
        let found = by_spec.or_else(by_status);
        match found {
            Some(index) => Ok(streams.swap_remove(index)),
            None => Err(Error::invalid(
                KIND,
                "",
                FieldError::not_found(&Path::new("dockerImageRepository"), repository.as_str())
                    .into(),
            )),
        }
    }
}
