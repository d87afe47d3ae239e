//! Change detection between two versions of a stream and the generation
//! bookkeeping that follows from it.

use crate::api::{ImageStream, TagEvent, TagReference};

/// Whether `next` asks for a different source than `old`.
///
/// Only the namespace (defaulted to the stream's own) and the name of `from`
/// count, plus an explicit request for generation zero.
pub(crate) fn tag_ref_changed(old: &TagReference, next: &TagReference, stream_namespace: &str) -> bool {
    let Some(next_from) = &next.from else {
        return false;
    };
    if next.from_kind_str().is_empty() && next.from_name().is_empty() {
        return false;
    }

    let or_own = |ns: &str| -> String {
        if ns.is_empty() {
            stream_namespace.to_owned()
        } else {
            ns.to_owned()
        }
    };
    if or_own(old.from_namespace()) != or_own(next_from.namespace.as_deref().unwrap_or_default()) {
        return true;
    }
    if old.from_name() != next.from_name() {
        return true;
    }
    tag_ref_generation_changed(old, next)
}

/// True only when both generations are set and the new one is an explicit zero.
fn tag_ref_generation_changed(old: &TagReference, next: &TagReference) -> bool {
    match (old.generation, next.generation) {
        (Some(old), Some(next)) => old != next && next == 0,
        _ => false,
    }
}

pub(crate) fn tag_event_changed(old: &TagEvent, next: &TagEvent) -> bool {
    old.image != next.image
        || old.docker_image_reference != next.docker_image_reference
        || old.generation > next.generation
}

/// Carries stored tag generations forward so clients can only set zero.
pub(crate) fn update_spec_tag_generations_for_update(stream: &mut ImageStream, old: &ImageStream) {
    for (tag, tag_ref) in &mut stream.spec.tags {
        if tag_ref.generation == Some(0) {
            continue;
        }
        if let Some(old_ref) = old.spec.tags.get(tag) {
            tag_ref.generation = old_ref.generation;
        }
    }
}

/// Gives new, changed and unset spec tags the stream generation.
///
/// An explicit zero is left for reconciliation to see and replace.
pub(crate) fn ensure_spec_tag_generations_are_set(stream: &mut ImageStream, old: Option<&ImageStream>) {
    let namespace = stream.namespace().to_owned();
    let generation = stream.generation();
    for (tag, tag_ref) in &mut stream.spec.tags {
        let changed = match old.and_then(|old| old.spec.tags.get(tag)) {
            None => true,
            Some(old_ref) => tag_ref_changed(old_ref, tag_ref, &namespace),
        };
        if changed && tag_ref.generation != Some(0) {
            tag_ref.generation = None;
        }
        if tag_ref.generation.is_none() {
            tag_ref.generation = Some(generation);
        }
    }
}

/// Replaces any generation still unset or zero with the stream generation.
pub(crate) fn finalize_spec_tag_generations(stream: &mut ImageStream) {
    let generation = stream.generation();
    for tag_ref in stream.spec.tags.values_mut() {
        if matches!(tag_ref.generation, None | Some(0)) {
            tag_ref.generation = Some(generation);
        }
    }
}

/// Backfills generation zero on status heads written by a status update.
///
/// A head whose content changed takes its spec tag's generation; an unchanged
/// head, or one without a spec tag generation, takes the stream's.
pub(crate) fn update_observed_generation_for_status_update(stream: &mut ImageStream, old: &ImageStream) {
    let generation = stream.generation();
    for (tag, history) in &mut stream.status.tags {
        let Some(head) = history.items.first_mut() else {
            continue;
        };
        if head.generation != 0 {
            continue;
        }

        let changed = old
            .status
            .tags
            .get(tag)
            .and_then(|older| older.items.first())
            .is_some_and(|older| tag_event_changed(older, head));
        if !changed {
            head.generation = generation;
            continue;
        }

        head.generation = stream
            .spec
            .tags
            .get(tag)
            .and_then(|spec| spec.generation)
            .unwrap_or(generation);
    }
}
