//! rollcall-imaging — Image conditioning and annotation.
//!
//! The conditioner equalizes luminance before detection; the annotator
//! draws match boxes and labels for human review.

pub mod annotate;
pub mod conditioner;

pub use annotate::{processed_path, AnnotateError, Annotator};
pub use conditioner::Conditioner;
