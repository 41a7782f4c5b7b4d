pub mod defs;
pub mod query;

pub use defs::{Item, ItemKey, Metadata, Source, UnknownSource};
pub use query::ContentQuery;
