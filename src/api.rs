//! The image stream kinds and the primitives that read and append tag history.

mod reference;
mod source;
pub mod tags;
mod types;


pub use reference::{DockerImageReference, ReferenceError};
pub use source::{SourceError, TagSource};
pub use tags::{
    add_tag_event, join_image_stream_tag, latest_tagged_image, resolve_image_id,
    split_image_stream_tag, update_changed_tracking_tags, update_tracking_tags,
};
pub use types::*;
