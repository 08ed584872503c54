pub mod cli;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod job;
pub mod pipeline;
pub mod queue;
pub mod utils;

pub use codec::{DecodeError, FeatureRecord};
pub use config::Opts;
pub use pipeline::{BatchSource, InputBatch, Pipeline, PipelineStats};
