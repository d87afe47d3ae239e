use std::{collections::BTreeMap, sync::Arc};

use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use kube_core::{ErrorResponse, WatchEvent};
use tokio_util::sync::CancellationToken;

use super::{image_stream_tag, ImageStreamTagRest};
use crate::{
    api::{
        join_image_stream_tag, latest_tagged_image, split_image_stream_tag, ImageStream,
        ImageStreamTag, TagEvent,
    },
    error::{Error, Result},
    store::{ImageStore, QualifiedName},
};

/// Extracts `<stream>` and `<tag>` from a field selector holding `name=<stream>:<tag>`.
pub fn tag_and_selector(field_selector: &str) -> Result<(String, String)> {
    let mut found = None;
    for requirement in field_selector.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        let Some((field, value)) = requirement.split_once('=') else {
            return Err(Error::BadRequest(format!("invalid field selector {requirement:?}")));
        };
        if field.trim() != "name" {
            continue;
        }
        let value = value.strip_prefix('=').unwrap_or(value).trim();
        let (stream, tag) = split_image_stream_tag(value).ok_or_else(|| {
            Error::BadRequest("name must be of the form <stream>:<tag>".to_owned())
        })?;
        found = Some((stream.to_owned(), tag.to_owned()));
    }
    found.ok_or_else(|| {
        Error::BadRequest(
            "image stream tags can only be watched by a field selector of the form name=<stream>:<tag>"
                .to_owned(),
        )
    })
}

impl ImageStreamTagRest {
    /// Follows one tag of one stream, emitting an event each time the head of
    /// its history changes, until `cancel` fires or the stream watch ends.
    pub fn watch(
        &self,
        namespace: Option<String>,
        field_selector: &str,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, WatchEvent<ImageStreamTag>>> {
        let (stream_name, tag) = tag_and_selector(field_selector)?;
        let state = TagWatch {
            events: self.streams.watch(namespace, Some(stream_name)),
            images: Arc::clone(&self.images),
            tag,
            heads: BTreeMap::new(),
        };
        Ok(stream::unfold(state, TagWatch::next)
            .take_until(cancel.cancelled_owned())
            .boxed())
    }
}

struct TagWatch {
    events: BoxStream<'static, Result<WatchEvent<ImageStream>>>,
    images: Arc<dyn ImageStore>,
    tag: String,
    /// Last emitted head per stream.
    heads: BTreeMap<QualifiedName, TagEvent>,
}

impl TagWatch {
    async fn next(mut self) -> Option<(WatchEvent<ImageStreamTag>, Self)> {
        loop {
            let event = match self.events.next().await? {
                Ok(event) => event,
                Err(err) => {
                    let event = failure(format!("error watching image streams: {err}"));
                    return Some((event, self));
                }
            };
            let emitted = match event {
                WatchEvent::Added(stream) => self.applied(stream, WatchEvent::Added).await,
                WatchEvent::Modified(stream) => self.applied(stream, WatchEvent::Modified).await,
                WatchEvent::Deleted(stream) => Some(self.deleted(&stream)),
                WatchEvent::Bookmark(_) => None,
                WatchEvent::Error(resp) => Some(WatchEvent::Error(resp)),
            };
            if let Some(emitted) = emitted {
                return Some((emitted, self));
            }
        }
    }

    async fn applied(
        &mut self,
        stream: ImageStream,
        wrap: fn(ImageStreamTag) -> WatchEvent<ImageStreamTag>,
    ) -> Option<WatchEvent<ImageStreamTag>> {
        let head = latest_tagged_image(&stream, &self.tag)?.clone();
        let key = QualifiedName::from_resource(&stream);
        if self.heads.get(&key) == Some(&head) {
            return None;
        }
        self.heads.insert(key, head);

        Some(match image_stream_tag(self.images.as_ref(), &stream, &self.tag).await {
            Ok(stream_tag) => wrap(stream_tag),
            Err(err) => failure(format!("error retrieving image stream tag: {err}")),
        })
    }

    fn deleted(&mut self, stream: &ImageStream) -> WatchEvent<ImageStreamTag> {
        self.heads.remove(&QualifiedName::from_resource(stream));
        WatchEvent::Deleted(ImageStreamTag::named(
            stream.namespace(),
            &join_image_stream_tag(stream.name(), &self.tag),
        ))
    }
}

fn failure(message: String) -> WatchEvent<ImageStreamTag> {
    WatchEvent::Error(ErrorResponse {
        status: "Failure".to_owned(),
        message,
        reason: "InternalError".to_owned(),
        code: 500,
    })
}
