//! The stack descriptor: a Compose file per stack, holding every service's
//! image reference. Versions live in the image tags.

pub mod compose;
pub mod store;
pub mod version;

pub use compose::{canary_variant, render, RenderContext};
pub use store::{DescriptorStore, DESCRIPTOR_FILE};
