//! PipeMagic core: a client-side image-processing pipeline engine.
//!
//! A pipeline is a DAG of typed nodes whose outputs are immutable
//! [`ImageFrame`]s. The [`PipelineRunner`] validates the graph, orders it
//! topologically, memoizes per-node results under content-addressed cache
//! keys, streams progress/status/download events, and honors cooperative
//! cancellation. Two GPU-backed executors do the heavy lifting: `outline`
//! (jump-flooding signed distance field, with a chamfer CPU fallback) and
//! `upscale` (learned 2× RGB super-resolution with a bilinearly-upscaled
//! alpha channel).
//!
//! External ML capabilities (segmentation, super-resolution) are traits
//! injected through [`Capabilities`]; the engine itself never links an
//! inference framework.

pub mod cache;
pub mod cancel;
pub mod capability;
pub mod dsl;
pub mod encode;
pub mod error;
pub mod events;
pub mod executors;
pub mod frame;
pub mod gpu;
pub mod graph;
pub mod scheduler;

pub use cancel::CancelSignal;
pub use capability::{
    Capabilities, DownloadTracker, SegmentDevice, SegmentDtype, SegmentMask, Segmenter, SrConfig,
    SrContentType, SrModel, SuperResolver,
};
pub use dsl::{EdgeDef, NodeDef, NodeKind, PipelineDefinition};
pub use error::{CycleError, EngineError, ValidationIssue};
pub use events::{ExecutionContext, NodeStatus, RunOptions};
pub use frame::ImageFrame;
pub use scheduler::{decode_input, NodeState, PipelineRunner, RunOutput};
