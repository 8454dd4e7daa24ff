use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};

/// Kind of a node in the argument graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Claim,
    Entity,
}

/// Relation between two graph nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeLabel {
    #[serde(rename = "supports")]
    Supports,
    #[serde(rename = "attacks")]
    Attacks,
    #[serde(rename = "explains")]
    Explains,
    #[serde(rename = "relatedTo", alias = "related_to", alias = "related")]
    RelatedTo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(deserialize_with = "node_id")]
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    #[serde(deserialize_with = "node_id")]
    pub source: String,
    #[serde(deserialize_with = "node_id")]
    pub target: String,
    pub label: EdgeLabel,
}

/// Structured argument graph: claims and entities joined by typed relations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgumentGraph {
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

impl ArgumentGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Claim labels in node order.
    pub fn claims(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Claim)
            .map(|n| n.label.clone())
            .collect()
    }

    /// Remove edges whose endpoints are not nodes of this graph.
    /// Returns the number of edges removed.
    pub fn drop_dangling_edges(&mut self) -> usize {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        let before = self.edges.len();
        let kept: Vec<GraphEdge> = self
            .edges
            .iter()
            .filter(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str()))
            .cloned()
            .collect();
        self.edges = kept;
        before - self.edges.len()
    }

    /// Keep only the claim nodes whose label is in `keep`, plus all entities.
    /// Edges touching a removed node are removed with it.
    pub fn retain_claims(&mut self, keep: &[String]) {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        self.nodes
            .retain(|n| n.kind == NodeKind::Entity || keep.contains(n.label.as_str()));
        self.drop_dangling_edges();
    }
}

/// LLMs emit node ids as either strings or integers.
fn node_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}
