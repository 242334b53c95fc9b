//! Per-run thought tree.
//!
//! Nodes are keyed by uuid string ids, immutable after creation except for
//! the score fields written by the evaluator. The store belongs to exactly
//! one run; nothing here needs cross-run locking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TotError, TotResult};
use crate::types::ValueScore;

/// One intermediate reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Free-form thought text; the root carries the task instruction.
    pub thought: String,
    pub depth: usize,
    /// Weighted composite score; 0 until evaluated.
    #[serde(default)]
    pub score: f64,
    /// Raw evaluation dimensions; absent until evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_scores: Option<ValueScore>,
    /// True when the thought self-declares a completed solution.
    #[serde(default)]
    pub is_terminal: bool,
    #[serde(default)]
    pub children: Vec<String>,
}

impl ThoughtNode {
    fn new(parent_id: Option<String>, thought: String, depth: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id,
            thought,
            depth,
            score: 0.0,
            raw_scores: None,
            is_terminal: false,
            children: Vec::new(),
        }
    }

    /// Confidence axis of the raw scores; 0 until evaluated.
    pub fn confidence(&self) -> f64 {
        self.raw_scores.as_ref().map_or(0.0, |s| s.confidence)
    }
}

/// In-memory tree of thoughts for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThoughtGraph {
    nodes: HashMap<String, ThoughtNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root_id: Option<String>,
}

impl ThoughtGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the root node. Replaces any previous tree.
    pub fn create_root(&mut self, thought: impl Into<String>) -> String {
        let root = ThoughtNode::new(None, thought.into(), 0);
        let id = root.id.clone();
        self.nodes.clear();
        self.nodes.insert(id.clone(), root);
        self.root_id = Some(id.clone());
        id
    }

    /// Add a child under `parent_id`, optionally marked terminal.
    pub fn add_child(
        &mut self,
        parent_id: &str,
        thought: impl Into<String>,
        is_terminal: bool,
    ) -> TotResult<String> {
        let parent_depth = self
            .nodes
            .get(parent_id)
            .map(|n| n.depth)
            .ok_or_else(|| TotError::Internal(format!("unknown parent node {parent_id}")))?;

        let mut child = ThoughtNode::new(Some(parent_id.to_string()), thought.into(), parent_depth + 1);
        child.is_terminal = is_terminal;
        let id = child.id.clone();
        self.nodes.insert(id.clone(), child);
        self.nodes
            .get_mut(parent_id)
            .expect("parent checked above")
            .children
            .push(id.clone());
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&ThoughtNode> {
        self.nodes.get(id)
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root_id.as_deref()
    }

    /// Write evaluation results back onto a node.
    pub fn write_scores(&mut self, id: &str, raw: ValueScore, composite: f64) -> TotResult<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| TotError::Internal(format!("unknown node {id}")))?;
        node.raw_scores = Some(raw);
        node.score = composite;
        Ok(())
    }

    /// Thought texts along the root→id path, root first.
    pub fn path_texts(&self, id: &str) -> Vec<&str> {
        let mut parts = Vec::new();
        let mut current = self.nodes.get(id);
        while let Some(node) = current {
            parts.push(node.thought.as_str());
            current = node.parent_id.as_deref().and_then(|p| self.nodes.get(p));
        }
        parts.reverse();
        parts
    }

    /// Root→id path joined with newlines.
    pub fn path_string(&self, id: &str) -> String {
        self.path_texts(id).join("\n")
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ThoughtNode> {
        self.nodes.values()
    }
}
