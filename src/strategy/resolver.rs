//! Turns a spec tag's source into a history event.

use crate::{
    api::{latest_tagged_image, now, resolve_image_id, ImageStream, TagEvent, TagReference, TagSource},
    error::Result,
};

/// Resolves `source` against `stream`, the stream the source reads from.
///
/// `Ok(None)` means the referenced tag has no history yet; the caller should
/// leave the tag unresolved and try again later. A pinned generation on
/// `tag_ref` is copied onto the event.
pub fn tag_reference_to_tag_event(
    stream: &ImageStream,
    tag_ref: &TagReference,
    source: &TagSource,
) -> Result<Option<TagEvent>> {
    let event = match source {
        TagSource::DockerImage { pull_spec } => Some(TagEvent {
            created: now(),
            docker_image_reference: pull_spec.clone(),
            image: String::new(),
            generation: 0,
        }),
        TagSource::StreamImage { id, .. } => Some(resolve_image_id(stream, id)?),
        TagSource::StreamTag { tag, .. } => latest_tagged_image(stream, tag).cloned(),
    };

    Ok(event.map(|mut event| {
        if let Some(generation) = tag_ref.generation {
            event.generation = generation;
        }
        event
    }))
}
