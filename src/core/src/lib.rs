//! Image-Manip Core - Foundational Types and Abstractions
//!
//! Pure in-memory types shared by the runtime, CLI and server crates:
//! digests and chain-ID math, layer chains, snapshots, manifest wire
//! types, media-type constants and operation options. No I/O happens
//! in this crate.

pub mod descriptor;
pub mod digest;
pub mod error;
pub mod layer;
pub mod manifest;
pub mod media;
pub mod options;
pub mod snapshot;

// Re-export commonly used types
pub use descriptor::Descriptor;
pub use digest::{chain_id, Digest};
pub use error::{ManipError, Result};
pub use layer::{Layer, LayerChain};
pub use snapshot::Snapshot;

/// Image-Manip version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
