pub use anyhow::{Context, Error, Result};

pub mod errors {
    use std::path::PathBuf;
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq, Eq)]
    pub enum PatchError {
        #[error("log path marker not found in the tracer image")]
        MarkerMissing,
        #[error("log path marker found {0} times in the tracer image, expected once")]
        MarkerRepeated(usize),
        #[error("tracer image ends inside the log path slot")]
        SlotTruncated,
        #[error("log path is empty")]
        EmptyPath,
        #[error("log path is {len} bytes long, the tracer has room for {capacity}")]
        PathTooLong { len: usize, capacity: usize },
        #[error("log path contains a NUL byte")]
        InteriorNul,
        #[error("log path read back from the patched image does not match")]
        Verification,
    }

    #[derive(Error, Debug)]
    pub enum LaunchError {
        #[error("failed to fix up the tracer's log file path")]
        Patch(#[from] PatchError),
        #[error("failed to write the tracer library to {path}")]
        Deploy {
            path:   PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("failed to spawn the target process {command:?}")]
        Spawn {
            command:    String,
            #[source]
            source:     std::io::Error,
        },
        #[error("error while waiting on the target process")]
        Wait(#[source] std::io::Error),
    }
}

pub use errors::{LaunchError, PatchError};
