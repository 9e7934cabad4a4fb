//! The pipeline runner: validation, topological execution, memoization,
//! event surfacing, and output finalization.
//!
//! One [`PipelineRunner`] owns the per-node state map across runs, which is
//! what makes warm-cache re-runs possible: an unchanged pipeline over an
//! unchanged input revision replays entirely from recorded outputs.

use std::collections::HashMap;

use anyhow::Result;
use image::RgbaImage;
use tracing::{debug, warn};

use crate::cache::cache_key;
use crate::capability::Capabilities;
use crate::dsl::{parse_f32, parse_str, NodeKind, PipelineDefinition};
use crate::encode::{encode_frame, OutputFormat};
use crate::error::{Abort, EngineError};
use crate::events::{ExecutionContext, NodeStatus, RunOptions};
use crate::executors::execute_node;
use crate::frame::ImageFrame;
use crate::gpu::GpuContext;
use crate::graph::{downstream_nodes, topo_sort, upstream_nodes, validate};

const DEFAULT_QUALITY: f32 = 0.92;

/// Scheduler-owned per-node state. Observers read it via
/// [`PipelineRunner::node_states`]; only the scheduler writes.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub status: NodeStatus,
    pub progress: f32,
    pub status_message: Option<String>,
    pub download_progress: Option<f32>,
    pub error: Option<String>,
    pub output: Option<ImageFrame>,
    pub cache_key: Option<String>,
    pub device_used: Option<String>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            status: NodeStatus::Idle,
            progress: 0.0,
            status_message: None,
            download_progress: None,
            error: None,
            output: None,
            cache_key: None,
            device_used: None,
        }
    }
}

#[derive(Debug)]
pub struct RunOutput {
    pub blob: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub node_outputs: HashMap<String, ImageFrame>,
}

pub struct PipelineRunner {
    states: HashMap<String, NodeState>,
    capabilities: Capabilities,
}

impl PipelineRunner {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            states: HashMap::new(),
            capabilities,
        }
    }

    pub fn node_states(&self) -> &HashMap<String, NodeState> {
        &self.states
    }

    /// Drop the memoized result of `node_id` and everything downstream.
    ///
    /// Editors must call this after mutating a node's params; replacing an
    /// input node's source image instead bumps the frame revision, which
    /// cascades through cache keys on its own.
    pub fn invalidate_node(&mut self, pipeline: &PipelineDefinition, node_id: &str) {
        let mut targets = vec![node_id.to_string()];
        targets.extend(downstream_nodes(node_id, &pipeline.edges));
        for id in targets {
            if let Some(state) = self.states.get_mut(&id) {
                state.cache_key = None;
                state.output = None;
                state.status = NodeStatus::Idle;
            }
        }
    }

    /// Execute the pipeline over `input`.
    ///
    /// The frame is the logical source for every `input` node; the engine
    /// supports a single input image per run. Errors inside a node executor
    /// do not abort the run (the node is marked errored and downstream nodes
    /// fail with "No input image"); validation problems and cancellation do.
    pub fn run(
        &mut self,
        pipeline: &PipelineDefinition,
        input: &ImageFrame,
        gpu: Option<&GpuContext>,
        options: &RunOptions,
    ) -> Result<RunOutput, EngineError> {
        let issues = validate(pipeline);
        if !issues.is_empty() {
            return Err(EngineError::Validation(issues));
        }
        let order = topo_sort(&pipeline.nodes, &pipeline.edges)?;

        // Fresh transient state; memoized outputs and keys survive.
        self.states
            .retain(|id, _| pipeline.nodes.iter().any(|n| n.id == *id));
        for node in &pipeline.nodes {
            let state = self.states.entry(node.id.clone()).or_default();
            state.status = NodeStatus::Idle;
            state.progress = 0.0;
            state.status_message = None;
            state.download_progress = None;
            state.error = None;
        }

        for id in &order {
            if options.signal.is_cancelled() {
                return Err(EngineError::Aborted);
            }

            // The order is a permutation of pipeline.nodes; lookup cannot fail.
            let node = pipeline.node(id).expect("ordered node is in the pipeline");

            let inputs: Vec<ImageFrame> = if node.kind == NodeKind::Input {
                vec![input.clone()]
            } else {
                upstream_nodes(id, &pipeline.edges)
                    .iter()
                    .filter_map(|u| self.states.get(u).and_then(|s| s.output.clone()))
                    .collect()
            };
            let revs: Vec<u64> = inputs.iter().map(ImageFrame::revision).collect();
            let key = cache_key(id, &node.params, &revs);

            let state = self.states.entry(id.clone()).or_default();
            if state.cache_key.as_deref() == Some(key.as_str()) && state.output.is_some() {
                state.status = NodeStatus::Cached;
                state.progress = 1.0;
                emit_status(options, id, NodeStatus::Cached, None);
                continue;
            }

            state.status = NodeStatus::Pending;
            emit_status(options, id, NodeStatus::Pending, None);

            state.status = NodeStatus::Running;
            state.progress = 0.0;
            emit_status(options, id, NodeStatus::Running, None);
            if let Some(cb) = &options.on_node_progress {
                cb(id, 0.0);
            }

            let ctx = ExecutionContext::new(id, options);
            let result = execute_node(node, &inputs, &ctx, gpu, &mut self.capabilities);
            let device_used = ctx.device_used();
            let last_message = ctx.last_status_message();
            let last_download = ctx.last_download_progress();

            let state = self.states.entry(id.clone()).or_default();
            state.status_message = last_message;
            state.download_progress = last_download;
            match result {
                Ok(frame) => {
                    debug!(node = %id, revision = frame.revision(), "node done");
                    state.status = NodeStatus::Done;
                    state.progress = 1.0;
                    state.output = Some(frame);
                    state.cache_key = Some(key);
                    state.device_used = device_used.map(str::to_owned);
                    if let Some(cb) = &options.on_node_progress {
                        cb(id, 1.0);
                    }
                    emit_status(options, id, NodeStatus::Done, None);
                }
                Err(e) if e.is::<Abort>() || options.signal.is_cancelled() => {
                    // The node did not complete and is not errored; it must
                    // not be left as `running`.
                    state.status = NodeStatus::Pending;
                    emit_status(options, id, NodeStatus::Pending, None);
                    return Err(EngineError::Aborted);
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    warn!(node = %id, error = %message, "node failed");
                    state.status = NodeStatus::Error;
                    state.error = Some(message.clone());
                    state.output = None;
                    state.cache_key = None;
                    emit_status(options, id, NodeStatus::Error, Some(&message));
                }
            }
        }

        self.finalize(pipeline)
    }

    fn finalize(&self, pipeline: &PipelineDefinition) -> Result<RunOutput, EngineError> {
        let output_node = pipeline
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Output)
            .ok_or(EngineError::NoOutput)?;

        let frame = self
            .states
            .get(&output_node.id)
            .filter(|s| matches!(s.status, NodeStatus::Done | NodeStatus::Cached))
            .and_then(|s| s.output.clone())
            .ok_or(EngineError::NoOutput)?;

        let format = parse_str(&output_node.params, "format").unwrap_or("png");
        let quality = parse_f32(&output_node.params, "quality").unwrap_or(DEFAULT_QUALITY);
        let blob = OutputFormat::parse(format)
            .and_then(|f| encode_frame(&frame, f, quality))
            .map_err(|e| {
                warn!(error = %format!("{e:#}"), "output encode failed");
                EngineError::NoOutput
            })?;

        let node_outputs = self
            .states
            .iter()
            .filter_map(|(id, s)| s.output.clone().map(|f| (id.clone(), f)))
            .collect();

        Ok(RunOutput {
            blob,
            width: frame.width(),
            height: frame.height(),
            node_outputs,
        })
    }
}

/// Decode an encoded container (blob/file bytes) into an input frame. The
/// convenience boundary of the run API; decoded bitmaps can be wrapped with
/// [`ImageFrame::new`] directly.
pub fn decode_input(bytes: &[u8]) -> Result<ImageFrame> {
    let bitmap: RgbaImage = image::load_from_memory(bytes)?.to_rgba8();
    Ok(ImageFrame::new(bitmap))
}

fn emit_status(options: &RunOptions, id: &str, status: NodeStatus, error: Option<&str>) {
    if let Some(cb) = &options.on_node_status {
        cb(id, status, error);
    }
}
