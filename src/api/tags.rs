//! Operations over a stream's tag history.

use std::collections::BTreeSet;

use super::{
    source::TagSource,
    types::{now, ImageStream, TagEvent, TagReference, DEFAULT_IMAGE_TAG},
};
use crate::error::{Error, Result};

/// Joins a stream name and a tag into `<stream>:<tag>`.
pub fn join_image_stream_tag(name: &str, tag: &str) -> String {
    let tag = if tag.is_empty() { DEFAULT_IMAGE_TAG } else { tag };
    format!("{name}:{tag}")
}

/// Splits `<stream>:<tag>`. Both halves must be non-empty.
pub fn split_image_stream_tag(name_and_tag: &str) -> Option<(&str, &str)> {
    let (name, tag) = name_and_tag.split_once(':')?;
    if name.is_empty() || tag.is_empty() || tag.contains(':') {
        return None;
    }
    Some((name, tag))
}

/// The most recent event of `tag`, where an empty tag means `latest`.
pub fn latest_tagged_image<'a>(stream: &'a ImageStream, tag: &str) -> Option<&'a TagEvent> {
    let tag = if tag.is_empty() { DEFAULT_IMAGE_TAG } else { tag };
    stream
        .status
        .tags
        .get(tag)
        .and_then(|history| history.items.first())
}

/// Records `next` as the newest event of `tag`.
///
/// If the head already points at the same image and pull spec only its
/// generation is refreshed. Returns whether the history changed.
pub fn add_tag_event(stream: &mut ImageStream, tag: &str, next: TagEvent) -> bool {
    let history = stream.status.tags.entry(tag.to_owned()).or_default();
    let Some(head) = history.items.first_mut() else {
        history.items.push(next);
        return true;
    };

    let same_image = head.image == next.image;
    let same_ref = head.docker_image_reference == next.docker_image_reference;
    if same_image && same_ref {
        if head.generation == next.generation {
            return false;
        }
        head.generation = next.generation;
    } else {
        history.items.insert(0, next);
    }
    history.conditions.clear();
    true
}

/// Finds the single image in the stream's history whose name (or digest hex)
/// starts with `image_id`, and returns a fresh event pointing at it.
pub fn resolve_image_id(stream: &ImageStream, image_id: &str) -> Result<TagEvent> {
    let mut found: Option<&TagEvent> = None;
    let mut matches = BTreeSet::new();
    for event in stream.status.tags.values().flat_map(|history| &history.items) {
        let hex = event
            .image
            .split_once(':')
            .map_or(event.image.as_str(), |(_, hex)| hex);
        if event.image.starts_with(image_id) || hex.starts_with(image_id) {
            found = Some(event);
            matches.insert(event.image.as_str());
        }
    }

    match (found, matches.len()) {
        (Some(event), 1) => Ok(TagEvent {
            created: now(),
            docker_image_reference: event.docker_image_reference.clone(),
            image: event.image.clone(),
            generation: 0,
        }),
        (_, 0) | (None, _) => Err(Error::not_found("imagestreamimage", image_id)),
        _ => Err(Error::conflict(
            "imagestreamimage",
            image_id,
            format!(
                "multiple images match the prefix {image_id:?}: {}",
                matches.into_iter().collect::<Vec<_>>().join(", ")
            ),
        )),
    }
}

/// The tag `tag_ref` tracks within `stream`, if it is a tracking tag.
///
/// A tracking tag is an `ImageStreamTag` source pointing back into the same
/// stream and namespace.
pub fn tracked_tag(stream: &ImageStream, tag_ref: &TagReference) -> Option<String> {
    let from = tag_ref.from.as_ref()?;
    match TagSource::parse(from, stream.name()).ok()? {
        TagSource::StreamTag {
            namespace,
            stream: source_stream,
            tag,
        } => {
            let same_namespace = namespace.map_or(true, |ns| ns == stream.namespace());
            (same_namespace && source_stream == stream.name()).then_some(tag)
        }
        _ => None,
    }
}

/// Mirrors `updated` onto every spec tag that tracks `updated_tag`.
/// Returns how many histories changed.
pub fn update_tracking_tags(stream: &mut ImageStream, updated_tag: &str, updated: &TagEvent) -> usize {
    let trackers: Vec<(String, Option<i64>)> = stream
        .spec
        .tags
        .iter()
        .filter(|(spec_tag, _)| spec_tag.as_str() != updated_tag)
        .filter(|(_, tag_ref)| tracked_tag(stream, tag_ref).as_deref() == Some(updated_tag))
        .map(|(spec_tag, tag_ref)| (spec_tag.clone(), tag_ref.generation))
        .collect();

    let mut changed = 0;
    for (spec_tag, generation) in trackers {
        log::trace!(
            "updating tracking tag {spec_tag} of {}/{} to {}",
            stream.namespace(),
            stream.name(),
            updated.docker_image_reference
        );
        let mut event = updated.clone();
        if let Some(generation) = generation {
            event.generation = generation;
        }
        if add_tag_event(stream, &spec_tag, event) {
            changed += 1;
        }
    }
    changed
}

/// Runs [`update_tracking_tags`] for every tag whose head differs from `old`.
/// Every tag counts as changed when there is no old stream.
pub fn update_changed_tracking_tags(stream: &mut ImageStream, old: Option<&ImageStream>) -> usize {
    let heads: Vec<(String, TagEvent)> = stream
        .status
        .tags
        .iter()
        .filter_map(|(tag, history)| Some((tag, history.items.first()?)))
        .filter(|(tag, head)| {
            let Some(old) = old else {
                return true;
            };
            match latest_tagged_image(old, tag) {
                None => true,
                Some(old_head) => {
                    old_head.image != head.image
                        || old_head.docker_image_reference != head.docker_image_reference
                }
            }
        })
        .map(|(tag, head)| (tag.clone(), head.clone()))
        .collect();

    heads
        .iter()
        .map(|(tag, head)| update_tracking_tags(stream, tag, head))
        .sum()
}
