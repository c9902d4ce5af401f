//! typed tags attached to file entries and path metadata

mod blob;
mod store;
mod value;

pub use store::{Tag, TagOwner, TagStore};
pub use value::{Repr, TagType, TagValue, TagValueType, Yaml};
