use std::fmt;
use std::ops::Not;

use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{OtelMapError, Result};

/// Call tree rooted at one entry span of a trace.
///
/// A tree is as deep as the trace it came from, so drop, clone, equality and
/// serde all walk an explicit stack. On the wire a flow is a pre-order list of
/// [`FlowNode`]s, each naming the position of its parent.
pub struct RequestFlow {
    pub service: String,
    pub trace_id: String,
    pub span_id: String,
    pub operation: String,
    pub duration_ms: i64,
    pub truncated: bool,
    pub children: Vec<RequestFlow>,
}

/// One node of a flow in pre-order wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Pre-order position of the parent node; absent on the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    pub service: String,
    pub trace_id: String,
    pub span_id: String,
    pub operation: String,
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Not::not")]
    pub truncated: bool,
}

#[derive(Debug, PartialEq, Serialize)]
struct NodeRef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<usize>,
    service: &'a str,
    trace_id: &'a str,
    span_id: &'a str,
    operation: &'a str,
    duration_ms: i64,
    #[serde(skip_serializing_if = "Not::not")]
    truncated: bool,
}

impl RequestFlow {
    /// Number of nodes in this subtree, including `self`.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1)];
        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            stack.extend(node.children.iter().map(|c| (c, depth + 1)));
        }
        max
    }

    /// Flattens the tree into its pre-order wire form.
    pub fn to_nodes(&self) -> Vec<FlowNode> {
        self.preorder()
            .into_iter()
            .map(|(parent, node)| FlowNode {
                parent,
                service: node.service.clone(),
                trace_id: node.trace_id.clone(),
                span_id: node.span_id.clone(),
                operation: node.operation.clone(),
                duration_ms: node.duration_ms,
                truncated: node.truncated,
            })
            .collect()
    }

    /// Rebuilds a tree from pre-order nodes. The first node is the root and
    /// every other node must name an earlier node as its parent.
    pub fn from_nodes(nodes: Vec<FlowNode>) -> Result<Self> {
        let mut parents = Vec::with_capacity(nodes.len());
        let mut flat = Vec::with_capacity(nodes.len());
        for (idx, node) in nodes.into_iter().enumerate() {
            match (idx, node.parent) {
                (0, None) => {}
                (0, Some(p)) => {
                    return Err(OtelMapError::Parse(format!(
                        "request flow root cannot have parent {p}"
                    )));
                }
                (_, Some(p)) if p < idx => {}
                (_, parent) => {
                    return Err(OtelMapError::Parse(format!(
                        "request flow node {idx} has invalid parent {parent:?}"
                    )));
                }
            }
            parents.push(node.parent);
            flat.push(RequestFlow {
                service: node.service,
                trace_id: node.trace_id,
                span_id: node.span_id,
                operation: node.operation,
                duration_ms: node.duration_ms,
                truncated: node.truncated,
                children: Vec::new(),
            });
        }

        link(&parents, flat)
            .ok_or_else(|| OtelMapError::Parse("request flow has no nodes".to_string()))
    }

    fn preorder(&self) -> Vec<(Option<usize>, &RequestFlow)> {
        let mut out = Vec::new();
        let mut stack = vec![(None, self)];
        while let Some((parent, node)) = stack.pop() {
            let idx = out.len();
            out.push((parent, node));
            stack.extend(node.children.iter().rev().map(|c| (Some(idx), c)));
        }
        out
    }

    fn node_refs(&self) -> Vec<NodeRef<'_>> {
        self.preorder()
            .into_iter()
            .map(|(parent, node)| NodeRef {
                parent,
                service: &node.service,
                trace_id: &node.trace_id,
                span_id: &node.span_id,
                operation: &node.operation,
                duration_ms: node.duration_ms,
                truncated: node.truncated,
            })
            .collect()
    }

    fn shallow_clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            operation: self.operation.clone(),
            duration_ms: self.duration_ms,
            truncated: self.truncated,
            children: Vec::new(),
        }
    }
}

/// Attaches pre-order nodes to their parents with a reverse sweep. Every
/// parent index is smaller than its child's, so a node is complete by the
/// time it is moved under its parent.
fn link(parents: &[Option<usize>], flat: Vec<RequestFlow>) -> Option<RequestFlow> {
    let mut slots = flat.into_iter().map(Some).collect::<Vec<_>>();
    for idx in (1..slots.len()).rev() {
        let Some(mut node) = slots[idx].take() else {
            continue;
        };
        node.children.reverse();
        if let Some(p) = parents[idx]
            && let Some(parent) = slots[p].as_mut()
        {
            parent.children.push(node);
        }
    }

    let mut root = slots.first_mut()?.take()?;
    root.children.reverse();
    Some(root)
}

impl Drop for RequestFlow {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

impl Clone for RequestFlow {
    fn clone(&self) -> Self {
        let order = self.preorder();
        let parents = order.iter().map(|(p, _)| *p).collect::<Vec<_>>();
        let flat = order.iter().map(|(_, n)| n.shallow_clone()).collect();
        link(&parents, flat).unwrap_or_else(|| self.shallow_clone())
    }
}

impl PartialEq for RequestFlow {
    fn eq(&self, other: &Self) -> bool {
        self.node_refs() == other.node_refs()
    }
}

impl fmt::Debug for RequestFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.node_refs()).finish()
    }
}

impl Serialize for RequestFlow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let nodes = self.node_refs();
        let mut seq = serializer.serialize_seq(Some(nodes.len()))?;
        for node in &nodes {
            seq.serialize_element(node)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for RequestFlow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let nodes = Vec::<FlowNode>::deserialize(deserializer)?;
        Self::from_nodes(nodes).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(span_id: &str) -> RequestFlow {
        RequestFlow {
            service: format!("svc-{span_id}"),
            trace_id: "t1".to_string(),
            span_id: span_id.to_string(),
            operation: "GET /".to_string(),
            duration_ms: 5,
            truncated: false,
            children: Vec::new(),
        }
    }

    fn chain(depth: usize) -> RequestFlow {
        let mut flow = node(&format!("s{}", depth - 1));
        for i in (0..depth - 1).rev() {
            let mut parent = node(&format!("s{i}"));
            parent.children.push(flow);
            flow = parent;
        }
        flow
    }

    fn sample_tree() -> RequestFlow {
        let mut root = node("root");
        let mut api = node("api");
        api.children.push(node("db"));
        let mut cache = node("cache");
        cache.truncated = true;
        api.children.push(cache);
        root.children.push(api);
        root.children.push(node("audit"));
        root
    }

    #[test]
    fn wire_form_is_preorder_with_parent_positions() {
        let value = serde_json::to_value(sample_tree()).unwrap();
        let nodes = value.as_array().unwrap();
        let ids = nodes
            .iter()
            .map(|n| n["span_id"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["root", "api", "db", "cache", "audit"]);
        assert!(nodes[0].get("parent").is_none());
        assert_eq!(nodes[2]["parent"], 1);
        assert_eq!(nodes[3]["truncated"], true);
        assert!(nodes[2].get("truncated").is_none());
        assert_eq!(nodes[4]["parent"], 0);
    }

    #[test]
    fn json_keeps_child_order() {
        let tree = sample_tree();
        let raw = serde_json::to_string(&tree).unwrap();
        let back: RequestFlow = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, tree);
        let kids = back.children[0]
            .children
            .iter()
            .map(|c| c.span_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(kids, vec!["db", "cache"]);
    }

    #[test]
    fn flows_deeper_than_the_json_nesting_limit_decode() {
        let flow = chain(100);
        let raw = serde_json::to_vec(&vec![flow.clone()]).unwrap();
        let back: Vec<RequestFlow> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back[0].depth(), 100);
        assert_eq!(back[0], flow);
    }

    #[test]
    fn very_deep_flows_serialize_clone_and_drop() {
        let flow = chain(100_000);
        let copy = flow.clone();
        assert_eq!(copy.depth(), 100_000);

        let raw = serde_json::to_vec(&flow).unwrap();
        drop(flow);
        let back: RequestFlow = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back.size(), 100_000);
        assert!(back == copy);
    }

    #[test]
    fn rejects_malformed_parent_links() {
        let mut nodes = sample_tree().to_nodes();
        nodes[2].parent = Some(3);
        assert!(RequestFlow::from_nodes(nodes).is_err());

        let mut rooted = sample_tree().to_nodes();
        rooted[0].parent = Some(0);
        assert!(RequestFlow::from_nodes(rooted).is_err());

        assert!(RequestFlow::from_nodes(Vec::new()).is_err());
        assert!(serde_json::from_str::<RequestFlow>("[]").is_err());
    }
}
