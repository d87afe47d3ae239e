//! Structural validation of image stream kinds.
//!
//! Every function returns the full list of problems rather than the first.

pub mod field;


use lazy_static::lazy_static;
use regex::Regex;

use crate::api::{
    DockerImageReference, Image, ImageStream, ImageStreamMapping, KIND_DOCKER_IMAGE,
    KIND_IMAGE_STREAM_IMAGE, KIND_IMAGE_STREAM_TAG,
};
use field::{ErrorList, FieldError, Path};

lazy_static! {
    static ref DNS1123_LABEL: Regex = Regex::new("^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
    static ref STREAM_NAME: Regex = Regex::new("^[a-z0-9]+(?:[._-][a-z0-9]+)*$").unwrap();
    static ref TAG_NAME: Regex = Regex::new("^[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,127}$").unwrap();
}

fn is_dns1123_label(value: &str) -> bool {
    value.len() <= 63 && DNS1123_LABEL.is_match(value)
}

fn validate_namespace(namespace: &str, path: &Path) -> Option<FieldError> {
    if namespace.is_empty() {
        Some(FieldError::required(path, ""))
    } else if !is_dns1123_label(namespace) {
        Some(FieldError::invalid(
            path,
            namespace,
            "must be a DNS-1123 label",
        ))
    } else {
        None
    }
}

/// Checks a stream on its own, independent of any earlier version.
pub fn validate_image_stream(stream: &ImageStream) -> ErrorList {
    let mut errs = ErrorList::new();
    let metadata = Path::new("metadata");

    let name = stream.name();
    if name.is_empty() {
        errs.push(FieldError::required(&metadata.child("name"), ""));
    } else if name.len() > 255 || !STREAM_NAME.is_match(name) {
        errs.push(FieldError::invalid(
            &metadata.child("name"),
            name,
            "must be a lowercase image repository name",
        ));
    }
    errs.extend(validate_namespace(stream.namespace(), &metadata.child("namespace")));

    let spec = Path::new("spec");
    let repository = &stream.spec.docker_image_repository;
    if !repository.is_empty() {
        let path = spec.child("dockerImageRepository");
        match DockerImageReference::parse(repository) {
            Ok(reference) if !reference.tag.is_empty() || !reference.id.is_empty() => {
                errs.push(FieldError::invalid(
                    &path,
                    repository.as_str(),
                    "the repository name may not contain a tag or id",
                ));
            }
            Ok(_) => {}
            Err(err) => errs.push(FieldError::invalid(&path, repository.as_str(), err.to_string())),
        }
    }

    for (tag, tag_ref) in &stream.spec.tags {
        let path = spec.child("tags").key(tag);
        if !TAG_NAME.is_match(tag) {
            errs.push(FieldError::invalid(&path, tag.as_str(), "must be a valid tag name"));
        }
        let Some(from) = &tag_ref.from else {
            continue;
        };
        let from_path = path.child("from");
        let kind = from.kind.as_deref().unwrap_or_default();
        let from_name = from.name.as_deref().unwrap_or_default();
        match kind {
            "" => errs.push(FieldError::required(&from_path.child("kind"), "")),
            KIND_DOCKER_IMAGE | KIND_IMAGE_STREAM_TAG | KIND_IMAGE_STREAM_IMAGE => {}
            other => errs.push(FieldError::invalid(
                &from_path.child("kind"),
                other,
                "must be DockerImage, ImageStreamImage or ImageStreamTag",
            )),
        }
        if from_name.is_empty() {
            errs.push(FieldError::required(&from_path.child("name"), ""));
        } else if kind == KIND_DOCKER_IMAGE {
            if let Err(err) = DockerImageReference::parse(from_name) {
                errs.push(FieldError::invalid(
                    &from_path.child("name"),
                    from_name,
                    err.to_string(),
                ));
            }
        }
        if let Some(namespace) = from.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            if !is_dns1123_label(namespace) {
                errs.push(FieldError::invalid(
                    &from_path.child("namespace"),
                    namespace,
                    "must be a DNS-1123 label",
                ));
            }
        }
    }

    let status = Path::new("status");
    for (tag, history) in &stream.status.tags {
        let path = status.child("tags").key(tag).child("items");
        for (i, event) in history.items.iter().enumerate() {
            if event.docker_image_reference.is_empty() {
                errs.push(FieldError::required(
                    &path.index(i).child("dockerImageReference"),
                    "",
                ));
            }
        }
    }

    errs
}

fn validate_identity_unchanged(stream: &ImageStream, old: &ImageStream) -> ErrorList {
    let metadata = Path::new("metadata");
    let mut errs = ErrorList::new();
    if stream.name() != old.name() {
        errs.push(FieldError::invalid(
            &metadata.child("name"),
            stream.name(),
            "field is immutable",
        ));
    }
    if stream.namespace() != old.namespace() {
        errs.push(FieldError::invalid(
            &metadata.child("namespace"),
            stream.namespace(),
            "field is immutable",
        ));
    }
    errs
}

/// Checks a spec update against the stored stream.
pub fn validate_image_stream_update(stream: &ImageStream, old: &ImageStream) -> ErrorList {
    let mut errs = validate_identity_unchanged(stream, old);
    errs.extend(validate_image_stream(stream));
    errs
}

/// Checks a status update against the stored stream.
pub fn validate_image_stream_status_update(stream: &ImageStream, old: &ImageStream) -> ErrorList {
    validate_identity_unchanged(stream, old)
}

/// Checks that an image names itself and carries a parsable pull spec.
pub fn validate_image(image: &Image, path: &Path) -> ErrorList {
    let mut errs = ErrorList::new();
    if image.name().is_empty() {
        errs.push(FieldError::required(&path.child("metadata").child("name"), ""));
    }
    let reference = &image.docker_image_reference;
    let ref_path = path.child("dockerImageReference");
    if reference.is_empty() {
        errs.push(FieldError::required(&ref_path, ""));
    } else if let Err(err) = DockerImageReference::parse(reference) {
        errs.push(FieldError::invalid(&ref_path, reference.as_str(), err.to_string()));
    }
    errs
}

pub fn validate_image_stream_mapping(mapping: &ImageStreamMapping) -> ErrorList {
    let mut errs = ErrorList::new();
    let metadata = Path::new("metadata");

    let repository = &mapping.docker_image_repository;
    if !repository.is_empty() {
        if let Err(err) = DockerImageReference::parse(repository) {
            errs.push(FieldError::invalid(
                &Path::new("dockerImageRepository"),
                repository.as_str(),
                err.to_string(),
            ));
        }
    } else if mapping.name().is_empty() {
        errs.push(FieldError::required(&metadata.child("name"), ""));
        errs.push(FieldError::required(&Path::new("dockerImageRepository"), ""));
    }

    errs.extend(validate_namespace(mapping.namespace(), &metadata.child("namespace")));

    if !mapping.tag.is_empty() && !TAG_NAME.is_match(&mapping.tag) {
        errs.push(FieldError::invalid(
            &Path::new("tag"),
            mapping.tag.as_str(),
            "must be a valid tag name",
        ));
    }
    errs.extend(validate_image(&mapping.image, &Path::new("image")));
    errs
}
