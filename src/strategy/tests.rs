use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use super::*;
use crate::{
    api::{latest_tagged_image, now, ImageStream, TagEvent, TagReference, KIND_DOCKER_IMAGE},
    config::StaticRegistry,
    error::Error,
    store::{ImageStore, ImageStreamStore, MemoryStore},
    testing::{self, ctx, digest, event, storage, with_history, MaxTags, Reviewer, REGISTRY},
    validation::field::{ErrorList, ErrorType},
};

fn invalid_errors<T: std::fmt::Debug>(result: Result<T>) -> ErrorList {
    match result {
        Err(Error::Invalid { errors, .. }) => errors,
        other => panic!("expected an invalid error, got {other:?}"),
    }
}

fn error_type(errs: &ErrorList, field: &str) -> Option<ErrorType> {
    errs.iter()
        .find(|err| err.field == field)
        .map(|err| err.error_type)
}

fn docker_stream(pull_spec: &str) -> ImageStream {
    ImageStream::new("ns", "s").with_tag("latest", TagReference::docker_image(pull_spec))
}

#[tokio::test]
async fn create_resolves_docker_image_tags_at_generation_one() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;

    let created = streams
        .create(&ctx("ns"), docker_stream("example.com/repo:v1"))
        .await
        .unwrap();

    assert_eq!(created.generation(), 1);
    assert_eq!(created.spec.tags["latest"].generation, Some(1));
    let head = latest_tagged_image(&created, "latest").unwrap();
    assert_eq!(head.docker_image_reference, "example.com/repo:v1");
    assert_eq!(head.generation, 1);
    assert_eq!(Some(&head.created), created.creation_timestamp());
    assert_eq!(
        created.status.docker_image_repository,
        format!("{REGISTRY}/ns/s")
    );
}

#[tokio::test]
async fn resubmitting_the_same_spec_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;
    let created = streams
        .create(&ctx("ns"), docker_stream("example.com/repo:v1"))
        .await
        .unwrap();

    let mut resubmitted = created.clone();
    resubmitted.spec.tags.get_mut("latest").unwrap().generation = None;
    let updated = streams.update(&ctx("ns"), resubmitted).await.unwrap();

    assert_eq!(updated.generation(), 1);
    assert_eq!(updated.spec.tags["latest"].generation, Some(1));
    assert_eq!(updated.status.tags["latest"], created.status.tags["latest"]);
}

#[tokio::test]
async fn spec_changes_bump_generation_by_exactly_one() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;
    let mut stream = streams
        .create(&ctx("ns"), docker_stream("example.com/repo:v1"))
        .await
        .unwrap();

    for (version, generation) in [("v2", 2), ("v3", 3)] {
        stream.spec.tags.insert(
            "latest".to_owned(),
            TagReference::docker_image(&format!("example.com/repo:{version}")),
        );
        stream = streams.update(&ctx("ns"), stream).await.unwrap();
        assert_eq!(stream.generation(), generation);
        assert_eq!(stream.spec.tags["latest"].generation, Some(generation));
    }

    let history = &stream.status.tags["latest"].items;
    let refs: Vec<_> = history
        .iter()
        .map(|event| (event.docker_image_reference.as_str(), event.generation))
        .collect();
    assert_eq!(
        refs,
        vec![
            ("example.com/repo:v3", 3),
            ("example.com/repo:v2", 2),
            ("example.com/repo:v1", 1),
        ]
    );

    stream
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert("team".to_owned(), "images".to_owned());
    let relabeled = streams.update(&ctx("ns"), stream).await.unwrap();
    assert_eq!(relabeled.generation(), 3);
    assert_eq!(relabeled.status.tags["latest"].items.len(), 3);
}

#[tokio::test]
async fn generation_zero_re_resolves_without_duplicating_history() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;
    let mut stream = streams
        .create(&ctx("ns"), docker_stream("example.com/repo:v1"))
        .await
        .unwrap();

    stream.spec.tags.get_mut("latest").unwrap().generation = Some(0);
    let updated = streams.update(&ctx("ns"), stream).await.unwrap();

    assert_eq!(updated.generation(), 2);
    assert_eq!(updated.spec.tags["latest"].generation, Some(2));
    let history = &updated.status.tags["latest"].items;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].generation, 2);
}

#[tokio::test]
async fn denied_cross_namespace_tags_reject_the_whole_write() {
    let store = Arc::new(MemoryStore::new());
    store.insert(with_history(ImageStream::new("shared", "base"), "latest", vec![event("a")]));
    let reviewer = Reviewer::deny_all();
    let streams = storage(&store, reviewer.clone()).image_streams;

    let stream = ImageStream::new("ns", "app")
        .with_tag("base", TagReference::stream_tag("base:latest", Some("shared")));
    let errs = invalid_errors(streams.create(&ctx("ns"), stream).await);

    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].field, "spec.tags[base].from");
    assert_eq!(errs[0].error_type, ErrorType::Forbidden);
    assert_eq!(errs[0].detail, "shared/base");
    assert!(store.get("ns", "app").await.unwrap_err().is_not_found());

    let review = &reviewer.reviews()[0];
    let attrs = review.spec.resource_attributes.as_ref().unwrap();
    assert_eq!(attrs.verb.as_deref(), Some("get"));
    assert_eq!(attrs.resource.as_deref(), Some("imagestreams"));
    assert_eq!(attrs.namespace.as_deref(), Some("shared"));
    assert_eq!(attrs.name.as_deref(), Some("base"));
    assert_eq!(review.spec.user.as_deref(), Some("alice"));
}

#[tokio::test]
async fn denied_update_leaves_the_stored_stream_alone() {
    let store = Arc::new(MemoryStore::new());
    store.insert(with_history(ImageStream::new("shared", "base"), "latest", vec![event("a")]));
    let streams = storage(&store, Reviewer::allowing(&[])).image_streams;
    let created = streams
        .create(&ctx("ns"), docker_stream("example.com/repo:v1"))
        .await
        .unwrap();

    let mut stream = created.clone();
    stream
        .spec
        .tags
        .insert("base".to_owned(), TagReference::stream_tag("base:latest", Some("shared")));
    let errs = invalid_errors(streams.update(&ctx("ns"), stream).await);
    assert_eq!(error_type(&errs, "spec.tags[base].from"), Some(ErrorType::Forbidden));

    let stored = store.get("ns", "s").await.unwrap();
    assert_eq!(stored.metadata.resource_version, created.metadata.resource_version);
    assert!(!stored.spec.tags.contains_key("base"));
    assert!(!stored.status.tags.contains_key("base"));
}

#[tokio::test]
async fn allowed_cross_namespace_tags_resolve_once_and_are_not_rechecked() {
    let store = Arc::new(MemoryStore::new());
    store.insert(with_history(ImageStream::new("shared", "base"), "latest", vec![event("a")]));
    let reviewer = Reviewer::allowing(&["shared/base"]);
    let streams = storage(&store, reviewer.clone()).image_streams;

    let stream = ImageStream::new("ns", "app")
        .with_tag("base", TagReference::stream_tag("base:latest", Some("shared")));
    let created = streams.create(&ctx("ns"), stream).await.unwrap();

    let head = latest_tagged_image(&created, "base").unwrap();
    assert_eq!(head.image, digest("a"));
    assert_eq!(head.generation, 1);
    assert_eq!(reviewer.reviews().len(), 1);

    let mut relabeled = created;
    relabeled.metadata.labels = Some(BTreeMap::from([("a".to_owned(), "b".to_owned())]));
    streams.update(&ctx("ns"), relabeled).await.unwrap();
    assert_eq!(reviewer.reviews().len(), 1);
}

#[tokio::test]
async fn failed_reviews_deny() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::failing()).image_streams;
    let stream = ImageStream::new("ns", "app")
        .with_tag("base", TagReference::stream_image("base@sha256:abc", Some("shared")));
    let errs = invalid_errors(streams.create(&ctx("ns"), stream).await);
    assert_eq!(error_type(&errs, "spec.tags[base].from"), Some(ErrorType::Forbidden));
}

#[tokio::test]
async fn same_namespace_sources_skip_the_review() {
    let store = Arc::new(MemoryStore::new());
    store.insert(with_history(ImageStream::new("ns", "base"), "latest", vec![event("a")]));
    let reviewer = Reviewer::deny_all();
    let streams = storage(&store, reviewer.clone()).image_streams;

    let stream = ImageStream::new("ns", "app")
        .with_tag("implicit", TagReference::stream_tag("base:latest", None))
        .with_tag("explicit", TagReference::stream_tag("base:latest", Some("ns")));
    let created = streams.create(&ctx("ns"), stream).await.unwrap();

    assert!(reviewer.reviews().is_empty());
    assert_eq!(latest_tagged_image(&created, "implicit").unwrap().image, digest("a"));
    assert_eq!(latest_tagged_image(&created, "explicit").unwrap().image, digest("a"));
}

#[tokio::test]
async fn unpopulated_source_tags_stay_unresolved() {
    let store = Arc::new(MemoryStore::new());
    store.insert(ImageStream::new("ns", "b"));
    let streams = storage(&store, Reviewer::allow_all()).image_streams;

    let stream = ImageStream::new("ns", "a").with_tag("t1", TagReference::stream_tag("b:t2", None));
    let created = streams.create(&ctx("ns"), stream).await.unwrap();

    assert!(!created.status.tags.contains_key("t1"));
    assert_eq!(created.spec.tags["t1"].generation, Some(1));
}

#[tokio::test]
async fn resolution_failures_are_reported_together() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;

    let stream = ImageStream::new("ns", "a")
        .with_tag("pod", TagReference::from_kind("Pod", "x", None))
        .with_tag("gone", TagReference::stream_tag("missing:t", None));
    let errs = invalid_errors(streams.create(&ctx("ns"), stream).await);

    assert_eq!(error_type(&errs, "spec.tags[gone].from"), Some(ErrorType::NotFound));
    assert_eq!(error_type(&errs, "spec.tags[pod].from"), Some(ErrorType::Invalid));
    assert_eq!(error_type(&errs, "spec.tags[pod].from.kind"), Some(ErrorType::Invalid));
}

#[tokio::test]
async fn stream_images_resolve_from_own_history() {
    let store = Arc::new(MemoryStore::new());
    let mut seeded = with_history(ImageStream::new("ns", "app"), "latest", vec![event("a")]);
    seeded.set_generation(1);
    store.insert(seeded);
    let streams = storage(&store, Reviewer::allow_all()).image_streams;

    let mut stream = streams.get("ns", "app").await.unwrap();
    stream
        .spec
        .tags
        .insert("pinned".to_owned(), TagReference::stream_image("app@a", None));
    let updated = streams.update(&ctx("ns"), stream).await.unwrap();

    assert_eq!(updated.generation(), 2);
    let head = latest_tagged_image(&updated, "pinned").unwrap();
    assert_eq!(head.image, digest("a"));
    assert_eq!(head.generation, 2);

    let mut stream = updated;
    stream
        .spec
        .tags
        .insert("unknown".to_owned(), TagReference::stream_image("app@fff", None));
    let errs = invalid_errors(streams.update(&ctx("ns"), stream).await);
    assert_eq!(error_type(&errs, "spec.tags[unknown].from"), Some(ErrorType::NotFound));
}

#[tokio::test]
async fn tracking_tags_follow_tags_resolved_in_the_same_write() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;

    let stream = docker_stream("example.com/repo:v1")
        .with_tag("stable", TagReference::stream_tag("latest", None));
    let created = streams.create(&ctx("ns"), stream).await.unwrap();

    let stable = latest_tagged_image(&created, "stable").unwrap();
    assert_eq!(stable.docker_image_reference, "example.com/repo:v1");
    assert_eq!(stable.generation, 1);
}

#[tokio::test]
async fn status_updates_discard_spec_and_backfill_generations() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;
    let mut stream = streams
        .create(&ctx("ns"), docker_stream("example.com/repo:v1"))
        .await
        .unwrap();
    stream
        .spec
        .tags
        .insert("latest".to_owned(), TagReference::docker_image("example.com/repo:v2"));
    let mut stream = streams.update(&ctx("ns"), stream).await.unwrap();
    assert_eq!(stream.generation(), 2);

    stream
        .spec
        .tags
        .insert("smuggled".to_owned(), TagReference::docker_image("example.com/evil:1"));
    stream
        .status
        .tags
        .get_mut("latest")
        .unwrap()
        .items
        .insert(0, event("c"));
    stream.status.tags.insert(
        "imported".to_owned(),
        crate::api::TagEventList {
            items: vec![event("d")],
            conditions: Vec::new(),
        },
    );
    let updated = streams.update_status(&ctx("ns"), stream).await.unwrap();

    assert_eq!(updated.generation(), 2);
    assert!(!updated.spec.tags.contains_key("smuggled"));
    let latest = latest_tagged_image(&updated, "latest").unwrap();
    assert_eq!(latest.image, digest("c"));
    assert_eq!(latest.generation, 2);
    assert_eq!(latest_tagged_image(&updated, "imported").unwrap().generation, 2);
}

#[tokio::test]
async fn internal_updates_keep_the_submitted_status() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;
    let mut stream = streams
        .create(&ctx("ns"), docker_stream("example.com/repo:v1"))
        .await
        .unwrap();

    let mut imported = event("d");
    imported.generation = 1;
    stream.status.tags.insert(
        "imported".to_owned(),
        crate::api::TagEventList {
            items: vec![imported.clone()],
            conditions: Vec::new(),
        },
    );
    let updated = streams.update_internal(&ctx("ns"), stream.clone()).await.unwrap();
    assert_eq!(latest_tagged_image(&updated, "imported"), Some(&imported));

    let mut user_write = updated;
    user_write.status.tags.clear();
    let updated = streams.update(&ctx("ns"), user_write).await.unwrap();
    assert!(updated.status.tags.contains_key("latest"));
    assert!(updated.status.tags.contains_key("imported"));
}

#[tokio::test]
async fn writes_need_an_authenticated_user() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;
    let errs = invalid_errors(
        streams
            .create(&RequestContext::new("ns"), docker_stream("example.com/repo:v1"))
            .await,
    );
    assert_eq!(error_type(&errs, "imageStream"), Some(ErrorType::Forbidden));
}

#[tokio::test]
async fn limit_verifier_rejects_oversized_streams() {
    let store = Arc::new(MemoryStore::new());
    let streams = crate::config(StaticRegistry::new(REGISTRY), Reviewer::allow_all())
        .with_limit_verifier(MaxTags(1))
        .build(Arc::clone(&store), Arc::clone(&store) as Arc<dyn ImageStore>)
        .image_streams;

    let stream = docker_stream("example.com/repo:v1")
        .with_tag("v1", TagReference::docker_image("example.com/repo:v1"));
    let errs = invalid_errors(streams.create(&ctx("ns"), stream).await);
    assert_eq!(error_type(&errs, "imageStream"), Some(ErrorType::Forbidden));
    assert!(store.list(Some("ns")).await.unwrap().is_empty());
}

#[tokio::test]
async fn without_a_registry_the_status_repository_is_the_external_one() {
    let store = Arc::new(MemoryStore::new());
    let streams = crate::config(StaticRegistry::none(), Reviewer::allow_all())
        .build(Arc::clone(&store), Arc::clone(&store) as Arc<dyn ImageStore>)
        .image_streams;

    let mut stream = ImageStream::new("ns", "app");
    stream.spec.docker_image_repository = "docker.io/library/app".to_owned();
    let created = streams.create(&ctx("ns"), stream).await.unwrap();
    assert_eq!(created.status.docker_image_repository, "docker.io/library/app");
}

#[tokio::test]
async fn an_external_repository_wins_over_the_registry() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;

    let mut stream = ImageStream::new("ns", "s");
    stream.spec.docker_image_repository = "docker.io/library/ruby".to_owned();
    let created = streams.create(&ctx("ns"), stream).await.unwrap();
    assert_eq!(created.status.docker_image_repository, "docker.io/library/ruby");

    let stored = streams.get("ns", "s").await.unwrap();
    assert_eq!(stored.status.docker_image_repository, "docker.io/library/ruby");
}

#[tokio::test]
async fn creation_time_only_applies_to_generated_events() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;

    let imported_at: Time = serde_json::from_value(serde_json::json!("2020-01-01T00:00:00Z")).unwrap();
    let mut imported = event("d");
    imported.created = imported_at.clone();
    let stream = with_history(docker_stream("example.com/repo:v1"), "imported", vec![imported]);
    let created = streams.create_internal(&ctx("ns"), stream).await.unwrap();

    assert_eq!(latest_tagged_image(&created, "imported").unwrap().created, imported_at);
    assert_eq!(
        Some(&latest_tagged_image(&created, "latest").unwrap().created),
        created.creation_timestamp()
    );
}

#[tokio::test]
async fn docker_image_tags_resolve_inline_whether_or_not_they_are_aliases() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;

    let mut alias = TagReference::docker_image("example.com/repo:alias");
    alias.reference = true;
    let stream = docker_stream("example.com/repo:v1").with_tag("alias", alias);
    let created = streams.create(&ctx("ns"), stream).await.unwrap();

    for (tag, pull_spec) in [("latest", "example.com/repo:v1"), ("alias", "example.com/repo:alias")] {
        let head = latest_tagged_image(&created, tag).unwrap();
        assert_eq!(head.docker_image_reference, pull_spec);
        assert_eq!(head.generation, 1);
    }
}

#[tokio::test]
async fn get_and_list_are_decorated() {
    let store = Arc::new(MemoryStore::new());
    store.insert(ImageStream::new("ns", "raw"));
    store.insert(ImageStream::new("other", "raw"));
    let streams = storage(&store, Reviewer::allow_all()).image_streams;

    let stream = streams.get("ns", "raw").await.unwrap();
    assert_eq!(stream.status.docker_image_repository, format!("{REGISTRY}/ns/raw"));
    let listed = streams.list(Some("ns")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status.docker_image_repository, format!("{REGISTRY}/ns/raw"));
}

fn exported_stream() -> ImageStream {
    let mut stream = ImageStream::new("ns", "app")
        .with_tag("latest", TagReference::docker_image("docker.io/library/app:latest"))
        .with_tag("next", TagReference::docker_image("docker.io/library/app:next"));
    stream.metadata.uid = Some("uid".to_owned());
    stream.metadata.resource_version = Some("7".to_owned());
    stream.metadata.creation_timestamp = Some(now());
    with_history(stream, "latest", vec![event("a")])
}

#[test]
fn export_points_local_tags_at_the_registry_copy() {
    let store = Arc::new(MemoryStore::new());
    let strategy = testing::strategy(&store, Reviewer::allow_all());
    let mut stream = exported_stream();
    stream.status.docker_image_repository = format!("{REGISTRY}/ns/app");

    strategy.export(&mut stream, false).unwrap();

    assert_eq!(stream.metadata.namespace, None);
    assert_eq!(stream.metadata.uid, None);
    assert_eq!(stream.metadata.resource_version, None);
    assert_eq!(stream.metadata.creation_timestamp, None);
    assert_eq!(stream.status, ImageStreamStatus::default());
    let latest = stream.spec.tags["latest"].from.as_ref().unwrap();
    assert_eq!(latest.kind.as_deref(), Some(KIND_DOCKER_IMAGE));
    assert_eq!(latest.name.as_deref(), Some(format!("{REGISTRY}/ns/app:latest").as_str()));
    assert_eq!(
        stream.spec.tags["next"].from_name(),
        "docker.io/library/app:next"
    );
}

#[test]
fn export_without_a_repository_uses_the_head_pull_spec() {
    let store = Arc::new(MemoryStore::new());
    let strategy = testing::strategy(&store, Reviewer::allow_all());
    let mut stream = exported_stream();

    strategy.export(&mut stream, false).unwrap();

    assert_eq!(
        stream.spec.tags["latest"].from_name(),
        event("a").docker_image_reference
    );
    assert!(!stream.spec.tags.contains_key("next"));
}

#[test]
fn export_of_external_streams_keeps_only_spec() {
    let store = Arc::new(MemoryStore::new());
    let strategy = testing::strategy(&store, Reviewer::allow_all());
    let mut stream = exported_stream();
    stream.spec.docker_image_repository = "docker.io/library/app".to_owned();
    let spec = stream.spec.clone();

    strategy.export(&mut stream, false).unwrap();
    assert_eq!(stream.spec, spec);
    assert!(stream.status.tags.is_empty());

    let mut exact = exported_stream();
    strategy.export(&mut exact, true).unwrap();
    assert_eq!(exact.metadata.namespace.as_deref(), Some("ns"));
    assert_eq!(exact.metadata.resource_version, None);
    assert_eq!(exact.status.tags.len(), 1);
}

#[test]
fn prepare_for_create_resets_status_and_stamps_generations() {
    let store = Arc::new(MemoryStore::new());
    let strategy = testing::strategy(&store, Reviewer::allow_all());
    let mut stream = with_history(docker_stream("example.com/repo:v1"), "old", vec![event("a")]);
    stream.set_generation(9);
    stream.spec.tags.get_mut("latest").unwrap().generation = Some(5);

    strategy.prepare_for_create(&mut stream);

    assert_eq!(stream.generation(), 1);
    assert_eq!(stream.spec.tags["latest"].generation, Some(1));
    assert!(stream.status.tags.is_empty());
    assert_eq!(stream.status.docker_image_repository, format!("{REGISTRY}/ns/s"));

    let mut internal = with_history(docker_stream("example.com/repo:v1"), "old", vec![event("a")]);
    InternalStrategy(strategy).prepare_for_create(&mut internal);
    assert!(internal.status.tags.contains_key("old"));
}

#[tokio::test]
async fn conflicting_writes_are_rejected_by_the_store() {
    let store = Arc::new(MemoryStore::new());
    let streams = storage(&store, Reviewer::allow_all()).image_streams;
    let created = streams
        .create(&ctx("ns"), docker_stream("example.com/repo:v1"))
        .await
        .unwrap();

    let mut first = created.clone();
    first.spec.tags.insert("a".to_owned(), TagReference::docker_image("example.com/a:1"));
    streams.update(&ctx("ns"), first).await.unwrap();

    let mut second = created;
    second.spec.tags.insert("b".to_owned(), TagReference::docker_image("example.com/b:1"));
    let err = streams.update(&ctx("ns"), second).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.code(), 409);
}

#[test]
fn events_keep_explicit_generations_when_resolving() {
    let stream = ImageStream::new("ns", "app");
    let mut tag_ref = TagReference::docker_image("example.com/repo:v1");
    tag_ref.generation = Some(4);
    let source = TagSource::DockerImage {
        pull_spec: "example.com/repo:v1".to_owned(),
    };
    let event: TagEvent = tag_reference_to_tag_event(&stream, &tag_ref, &source)
        .unwrap()
        .unwrap();
    assert_eq!(event.generation, 4);
    assert_eq!(event.image, "");
}
