//! Layout document handling: schema, path resolution, flash descriptor.

pub mod resolver;
pub mod schema;

pub use resolver::{
    FlashDescriptor, ResolvedLayout, UnresolvedEntry, load_layout, resolve, resolve_with,
};
pub use schema::{ExtraEsptoolArgs, LayoutDocument};
