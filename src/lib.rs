pub mod aggregate;
pub mod candidate;
pub mod configuration;
pub mod error;
pub mod pipeline;
pub mod prober;
pub mod probers;
pub mod report;
pub mod source;
pub mod supervisor;
pub mod workspace;

pub use pipeline::{Pipeline, PipelineOptions};
