//! Pipeline JSON data model.
//!
//! The engine treats the serialized shape as `version: 1` with ordered node
//! and edge sequences. Unknown fields on nodes and edges are ignored so that
//! editor-side metadata can ride along without breaking the runtime.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Closed set of node kinds the engine can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Input,
    Output,
    RemoveBg,
    Normalize,
    Outline,
    Upscale,
}

impl NodeKind {
    /// Input/output endpoints are wired specially by the scheduler; everything
    /// else is a processing node that demands at least one gathered input.
    pub fn is_processing(self) -> bool {
        !matches!(self, NodeKind::Input | NodeKind::Output)
    }
}

/// Editor-owned canvas position. Opaque to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A directed connection. Handles are labels for debugging; routing is by the
/// `(source, target)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub id: String,
    pub source: String,
    #[serde(rename = "sourceHandle", default)]
    pub source_handle: String,
    pub target: String,
    #[serde(rename = "targetHandle", default)]
    pub target_handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub version: u32,
    pub nodes: Vec<NodeDef>,
    pub edges: Vec<EdgeDef>,
}

impl PipelineDefinition {
    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

pub fn load_pipeline_from_str(text: &str) -> Result<PipelineDefinition> {
    serde_json::from_str(text).context("failed to parse pipeline json")
}

pub fn load_pipeline_from_path(path: impl AsRef<std::path::Path>) -> Result<PipelineDefinition> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pipeline json at {}", path.display()))?;
    load_pipeline_from_str(&text)
}

pub fn find_node<'a>(pipeline: &'a PipelineDefinition, node_id: &str) -> Result<&'a NodeDef> {
    pipeline
        .node(node_id)
        .ok_or_else(|| anyhow!("node not found: {node_id}"))
}

// Param accessors. Node params arrive as loosely-typed JSON; numbers may be
// stored as integers or floats depending on the editor that wrote them.

pub fn parse_f32(params: &HashMap<String, serde_json::Value>, key: &str) -> Option<f32> {
    match params.get(key) {
        Some(v) => v
            .as_f64()
            .map(|x| x as f32)
            .or_else(|| v.as_u64().map(|x| x as f32))
            .or_else(|| v.as_i64().map(|x| x as f32)),
        None => None,
    }
}

pub fn parse_u32(params: &HashMap<String, serde_json::Value>, key: &str) -> Option<u32> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .or_else(|| {
            parse_f32(params, key).and_then(|v| {
                if v.is_finite() && v >= 0.0 {
                    Some(v.floor() as u32)
                } else {
                    None
                }
            })
        })
}

pub fn parse_str<'a>(params: &'a HashMap<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn parse_bool(params: &HashMap<String, serde_json::Value>, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipeline_and_ignores_unknown_fields() {
        let json = r##"{
            "version": 1,
            "nodes": [
                {"id": "in", "type": "input", "position": {"x": 0, "y": 0},
                 "params": {"maxSize": 512}, "editorColor": "#abc"},
                {"id": "out", "type": "output", "params": {"format": "png"}}
            ],
            "edges": [
                {"id": "e1", "source": "in", "sourceHandle": "image",
                 "target": "out", "targetHandle": "image", "animated": true}
            ]
        }"##;
        let p = load_pipeline_from_str(json).unwrap();
        assert_eq!(p.version, 1);
        assert_eq!(p.nodes.len(), 2);
        assert_eq!(p.nodes[0].kind, NodeKind::Input);
        assert_eq!(p.edges[0].target_handle, "image");
        assert_eq!(parse_u32(&p.nodes[0].params, "maxSize"), Some(512));
    }

    #[test]
    fn rejects_unknown_node_kind() {
        let json = r#"{
            "version": 1,
            "nodes": [{"id": "x", "type": "teleport"}],
            "edges": []
        }"#;
        assert!(load_pipeline_from_str(json).is_err());
    }

    #[test]
    fn numeric_params_accept_int_and_float_encodings() {
        let json = r#"{"a": 2, "b": 2.5, "c": -1, "d": "nope"}"#;
        let params: HashMap<String, serde_json::Value> = serde_json::from_str(json).unwrap();
        assert_eq!(parse_f32(&params, "a"), Some(2.0));
        assert_eq!(parse_f32(&params, "b"), Some(2.5));
        assert_eq!(parse_u32(&params, "a"), Some(2));
        assert_eq!(parse_u32(&params, "b"), Some(2));
        assert_eq!(parse_u32(&params, "c"), None);
        assert_eq!(parse_f32(&params, "d"), None);
        assert_eq!(parse_str(&params, "d"), Some("nope"));
    }

    #[test]
    fn node_kind_processing_split() {
        assert!(!NodeKind::Input.is_processing());
        assert!(!NodeKind::Output.is_processing());
        assert!(NodeKind::Outline.is_processing());
        assert!(NodeKind::RemoveBg.is_processing());
    }
}
