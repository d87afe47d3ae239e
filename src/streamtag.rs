//! `ImageStreamTag`: a read view of one tag of a stream, addressed as
//! `<stream>:<tag>`. There is no stored object; everything is derived from the
//! stream and the image its tag currently resolves to.

mod watch;


use std::sync::Arc;

use crate::{
    api::{join_image_stream_tag, split_image_stream_tag, ImageStream, ImageStreamTag},
    error::{Error, Result},
    registry::ImageStreamRegistry,
    store::ImageStore,
    strategy::{RequestContext, DEFAULT_NAMESPACE},
};

pub use watch::tag_and_selector;

const RESOURCE: &str = "imagestreamtags";

/// Splits an `<stream>:<tag>` identifier.
pub fn name_and_tag(id: &str) -> Result<(&str, &str)> {
    split_image_stream_tag(id).ok_or_else(|| {
        Error::BadRequest("imageStreamTags must be retrieved with <name>:<tag>".to_owned())
    })
}

pub struct ImageStreamTagRest {
    images: Arc<dyn ImageStore>,
    streams: Arc<ImageStreamRegistry>,
}

impl ImageStreamTagRest {
    pub fn new(images: Arc<dyn ImageStore>, streams: Arc<ImageStreamRegistry>) -> Self {
        Self { images, streams }
    }

    /// The image at the head of the tag's history. A tag whose history is
    /// empty, or whose head does not name an image, is not found.
    pub async fn get(&self, namespace: &str, id: &str) -> Result<ImageStreamTag> {
        let (name, tag) = name_and_tag(id)?;
        let stream = self.streams.get(namespace, name).await?;
        image_stream_tag(self.images.as_ref(), &stream, tag).await
    }

    /// Removes the spec tag. The history and the image are kept.
    pub async fn delete(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        let (name, tag) = name_and_tag(id)?;
        let namespace = ctx.namespace_or(DEFAULT_NAMESPACE);
        let mut stream = self.streams.get(namespace, name).await?;
        if stream.spec.tags.remove(tag).is_none() {
            return Err(Error::not_found(RESOURCE, id));
        }
        self.streams.update(ctx, stream).await?;
        Ok(())
    }
}

/// Builds the tag view of `tag` from an already fetched stream.
pub(crate) async fn image_stream_tag(
    images: &dyn ImageStore,
    stream: &ImageStream,
    tag: &str,
) -> Result<ImageStreamTag> {
    let id = join_image_stream_tag(stream.name(), tag);
    let history = stream.status.tags.get(tag);
    let head = history
        .and_then(|history| history.items.first())
        .filter(|head| !head.image.is_empty())
        .ok_or_else(|| Error::not_found(RESOURCE, id.as_str()))?;

    let mut image = images.get_image(&head.image).await?;
    let tag_ref = stream.spec.tags.get(tag).cloned();
    if let Some(tag_ref) = &tag_ref {
        image
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .extend(tag_ref.annotations.clone());
    }

    let mut stream_tag = ImageStreamTag::named(stream.namespace(), &id);
    stream_tag.metadata.creation_timestamp = Some(head.created.clone());
    stream_tag.tag = tag_ref;
    stream_tag.generation = head.generation;
    stream_tag.conditions = history
        .map(|history| history.conditions.clone())
        .unwrap_or_default();
    stream_tag.image = image;
    Ok(stream_tag)
}
