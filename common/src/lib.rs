//! Pieces both halves of vizzy must agree on: the layout of the patchable
//! log-path slot inside the tracer image, and the shape of a trace line.

mod tag;
mod record;

pub use tag::*;
pub use record::*;
