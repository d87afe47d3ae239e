use std::collections::BTreeMap;

use k8s_openapi::{api::core::v1::ObjectReference, apimachinery::pkg::apis::meta::v1::ObjectMeta};

use super::Strategy;
use crate::{
    api::{DockerImageReference, ImageStream, ImageStreamStatus, KIND_DOCKER_IMAGE},
    error::{Error, Result},
};

/// Clears the fields the server owns.
fn export_object_meta(meta: &mut ObjectMeta, exact: bool) {
    meta.uid = None;
    if !exact {
        meta.namespace = None;
    }
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.resource_version = None;
    meta.self_link = None;
    if !exact && meta.generate_name.as_deref().is_some_and(|name| !name.is_empty()) {
        meta.name = None;
    }
}

fn docker_image_from(name: String) -> Option<ObjectReference> {
    Some(ObjectReference {
        kind: Some(KIND_DOCKER_IMAGE.to_owned()),
        name: Some(name),
        ..ObjectReference::default()
    })
}

impl Strategy {
    /// Rewrites `stream` so it can be created elsewhere.
    ///
    /// Streams tracking an external repository keep only their spec. Streams
    /// served by the local registry get every tag with history pointed at the
    /// registry copy; with no registry known, at the head event's pull spec.
    pub fn export(&self, stream: &mut ImageStream, exact: bool) -> Result<()> {
        export_object_meta(&mut stream.metadata, exact);
        if exact {
            return Ok(());
        }

        if !stream.spec.docker_image_repository.is_empty() {
            stream.status = ImageStreamStatus::default();
            return Ok(());
        }

        let mut tags = BTreeMap::new();
        if !stream.status.docker_image_repository.is_empty() {
            let repository = &stream.status.docker_image_repository;
            let mut reference = DockerImageReference::parse(repository)
                .map_err(|err| Error::Internal(format!("unable to export {repository:?}: {err}")))?;
            for (name, history) in &stream.status.tags {
                if history.items.is_empty() {
                    continue;
                }
                let mut existing = stream.spec.tags.get(name).cloned().unwrap_or_default();
                reference.tag = name.clone();
                existing.from = docker_image_from(reference.to_string());
                tags.insert(name.clone(), existing);
            }
            for (name, tag_ref) in &stream.spec.tags {
                if !stream.status.tags.contains_key(name) {
                    tags.insert(name.clone(), tag_ref.clone());
                }
            }
        } else {
            for (name, history) in &stream.status.tags {
                let Some(head) = history.items.first() else {
                    continue;
                };
                let mut existing = stream.spec.tags.get(name).cloned().unwrap_or_default();
                existing.from = docker_image_from(head.docker_image_reference.clone());
                tags.insert(name.clone(), existing);
            }
        }

        stream.spec.tags = tags;
        stream.status = ImageStreamStatus::default();
        Ok(())
    }
}
