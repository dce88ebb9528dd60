//! Welcome to `vizzy`!
//!
//! The launcher half of the tracer. It carries a copy of the tracer
//! library inside its own binary, writes the user's log path into
//! that copy, drops it on disk and starts the target with it
//! preloaded.

/// Error types and the crate-wide `Result`.
pub mod utils;

/// The tracer library, as bundled at build time.
pub mod image;

/// Locating and rewriting the log path slot of a tracer image.
pub mod patch;

/// Deploying an image and running the target under it.
pub mod launch;

pub use utils::*;
pub use image::EmbeddedImage;
pub use patch::{patch, read_tagged_path};
pub use launch::{ChildOutcome, Deployment, Launcher, DEFAULT_DEPLOY_PATH, PRELOAD_ENV};
