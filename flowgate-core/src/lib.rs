//! Flowgate Core Library
//!
//! This crate provides the data model and contracts for the Flowgate
//! pipeline runtime: the component of a data-plane gateway that composes an
//! ordered chain of plugins into a running pipeline, drives tasks through it
//! in parallel, and hands requests off between pipelines.
//!
//! # Key Components
//!
//! - **Task**: One unit of work carrying payload, cancellation, and outcome
//!   through a plugin chain
//! - **Data Bucket**: Scoped key-value store for plugin-owned state
//! - **Statistics**: Throughput rates, execution-time distributions, custom
//!   indicators, and update callbacks
//! - **Cross-Pipeline Channel**: Bounded request handoff between pipelines
//!   with a rendezvous response path
//! - **Pipeline Context**: Per-pipeline facade binding the above, passed to
//!   every plugin call
//! - **Traits**: The plugin contract and the pipeline lifecycle contract
//!
//! The scheduler that drives workers lives in `flowgate-engine`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod statistics;
pub mod task;
pub mod traits;
pub mod value;

// Re-export key types at crate root for convenience
pub use bucket::{BucketScope, DataBucket};
pub use cancel::Cancellation;
pub use channel::{CrossPipelineRouter, DownstreamRequest, ResponseHandle, UpstreamResponse};
pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::{FlowgateError, Result};
pub use statistics::{PipelineStatistics, StatisticsKind};
pub use task::{ResultCode, Task};
pub use traits::{Pipeline, PipelineState, Plugin, PluginFactory};
pub use value::Value;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::bucket::{BucketScope, DataBucket};
    pub use crate::cancel::Cancellation;
    pub use crate::channel::{
        CrossPipelineRouter, DownstreamRequest, ResponseHandle, UpstreamResponse,
    };
    pub use crate::config::PipelineConfig;
    pub use crate::context::{
        PipelineContext, SourceInputListener, SourceInputQueueLengthGetter,
    };
    pub use crate::error::{FlowgateError, Result};
    pub use crate::statistics::{PipelineStatistics, StatisticsKind};
    pub use crate::task::{ResultCode, Task};
    pub use crate::traits::{
        Pipeline, PipelineFuture, PipelineState, Plugin, PluginFactory, PluginFuture,
    };
    pub use crate::value::Value;
}
