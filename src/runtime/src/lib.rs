//! Image rewrite engine.
//!
//! Treats an image's layer chain as a rewritable history: rebase it onto
//! a new base, squash a range of layers, or append a file-removal layer.
//! All storage goes through the narrow capability traits in [`store`],
//! so the rewrite logic never touches a concrete containerd client;
//! production bindings and in-memory test fakes both live under `store`.

pub mod content;
pub mod history;
pub mod image;
pub mod list;
pub mod plan;
pub mod rebase;
pub mod runtime;
pub mod snapshot;
pub mod store;
pub mod verify;

pub use image::Image;
pub use plan::{Action, Plan};
pub use runtime::Runtime;
