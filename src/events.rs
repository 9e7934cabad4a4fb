//! Run observation: node status, progress callbacks, per-node context.

use std::cell::{Cell, RefCell};

use anyhow::Result;
use serde::Serialize;

use crate::cancel::CancelSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Idle,
    Pending,
    Running,
    Done,
    Error,
    Cached,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Idle => "idle",
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Done => "done",
            NodeStatus::Error => "error",
            NodeStatus::Cached => "cached",
        };
        f.write_str(s)
    }
}

pub type ProgressFn = dyn Fn(&str, f32);
pub type StatusFn = dyn Fn(&str, NodeStatus, Option<&str>);
pub type StatusMessageFn = dyn Fn(&str, Option<&str>);
pub type DownloadProgressFn = dyn Fn(&str, Option<f32>);

/// Caller-supplied observation hooks plus the cancellation signal.
///
/// All callbacks receive the node id as their first argument. Status messages
/// and download progress are best-effort and carry no ordering guarantee
/// relative to `progress`.
#[derive(Default)]
pub struct RunOptions {
    pub signal: CancelSignal,
    pub on_node_progress: Option<Box<ProgressFn>>,
    pub on_node_status: Option<Box<StatusFn>>,
    pub on_node_status_message: Option<Box<StatusMessageFn>>,
    pub on_node_download_progress: Option<Box<DownloadProgressFn>>,
}

/// Per-node view of the run handed to executors.
///
/// Executors never know which node they are: the scheduler binds the id here
/// and re-dispatches every callback with it. Progress is clamped monotonic
/// non-decreasing within the node's run.
pub struct ExecutionContext<'a> {
    node_id: &'a str,
    options: &'a RunOptions,
    last_progress: Cell<f32>,
    last_message: RefCell<Option<String>>,
    last_download: Cell<Option<f32>>,
    device_used: Cell<Option<&'static str>>,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(node_id: &'a str, options: &'a RunOptions) -> Self {
        Self {
            node_id,
            options,
            last_progress: Cell::new(0.0),
            last_message: RefCell::new(None),
            last_download: Cell::new(None),
            device_used: Cell::new(None),
        }
    }

    /// Record which compute path produced the node's output ("webgpu", "cpu",
    /// "wasm"). The scheduler copies this into the node's state.
    pub fn set_device_used(&self, device: &'static str) {
        self.device_used.set(Some(device));
    }

    pub(crate) fn device_used(&self) -> Option<&'static str> {
        self.device_used.get()
    }

    pub fn node_id(&self) -> &str {
        self.node_id
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.options.signal
    }

    /// Err([`Abort`](crate::error::Abort)) once cancellation was requested.
    /// Call at every suspension point.
    pub fn check_cancelled(&self) -> Result<()> {
        self.options.signal.check()
    }

    pub fn progress(&self, value: f32) {
        let clamped = value.clamp(self.last_progress.get(), 1.0);
        self.last_progress.set(clamped);
        if let Some(cb) = &self.options.on_node_progress {
            cb(self.node_id, clamped);
        }
    }

    pub fn status_message(&self, message: Option<&str>) {
        *self.last_message.borrow_mut() = message.map(str::to_owned);
        if let Some(cb) = &self.options.on_node_status_message {
            cb(self.node_id, message);
        }
    }

    /// `Some(ratio)` while weights download, `None` when the phase ends.
    pub fn download_progress(&self, ratio: Option<f32>) {
        self.last_download.set(ratio);
        if let Some(cb) = &self.options.on_node_download_progress {
            cb(self.node_id, ratio);
        }
    }

    pub(crate) fn last_status_message(&self) -> Option<String> {
        self.last_message.borrow().clone()
    }

    pub(crate) fn last_download_progress(&self) -> Option<f32> {
        self.last_download.get()
    }
}
