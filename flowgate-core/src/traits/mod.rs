//! Core abstractions: plugins and pipelines.

pub mod pipeline;
pub mod plugin;

pub use pipeline::{Pipeline, PipelineFuture, PipelineState};
pub use plugin::{Plugin, PluginFactory, PluginFuture};
