use std::collections::HashSet;

use otelmap_core::model::flow::RequestFlow;
use otelmap_core::model::service_map::CycleDiagnostic;
use otelmap_core::model::span::SpanRecord;
use tracing::warn;

use crate::index::SpanIndex;

/// Per-trace call forest plus any cycles cut while building it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub flows: Vec<RequestFlow>,
    pub diagnostics: Vec<CycleDiagnostic>,
}

type SpanKey<'a> = (&'a str, &'a str);

fn key(span: &SpanRecord) -> SpanKey<'_> {
    (span.trace_id.as_str(), span.span_id.as_str())
}

struct Slot<'a> {
    span: &'a SpanRecord,
    truncated: bool,
    children: Vec<usize>,
}

enum Step<'a> {
    Enter {
        span: &'a SpanRecord,
        parent: Option<usize>,
    },
    Exit(SpanKey<'a>),
}

struct Walker<'i, 'a> {
    index: &'i SpanIndex<'a>,
    slots: Vec<Slot<'a>>,
    visited: HashSet<SpanKey<'a>>,
    diagnostics: Vec<CycleDiagnostic>,
}

impl<'i, 'a> Walker<'i, 'a> {
    /// Depth-first expansion on an explicit stack. A span already on the
    /// current root-to-node path is not entered again; its parent is marked
    /// truncated instead.
    fn expand(&mut self, root: &'a SpanRecord) -> usize {
        let root_slot = self.slots.len();
        let mut on_path: HashSet<SpanKey<'a>> = HashSet::new();
        let mut stack = vec![Step::Enter {
            span: root,
            parent: None,
        }];

        while let Some(step) = stack.pop() {
            let (span, parent) = match step {
                Step::Exit(k) => {
                    on_path.remove(&k);
                    continue;
                }
                Step::Enter { span, parent } => (span, parent),
            };

            let k = key(span);
            if on_path.contains(&k) {
                if let Some(p) = parent {
                    self.slots[p].truncated = true;
                }
                warn!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    "span revisited on its own call path, branch truncated"
                );
                self.diagnostics.push(CycleDiagnostic {
                    trace_id: span.trace_id.clone(),
                    span_id: span.span_id.clone(),
                });
                continue;
            }

            on_path.insert(k);
            self.visited.insert(k);
            let slot = self.slots.len();
            self.slots.push(Slot {
                span,
                truncated: false,
                children: Vec::new(),
            });
            if let Some(p) = parent {
                self.slots[p].children.push(slot);
            }

            stack.push(Step::Exit(k));
            for child in self.index.children_of(&span.trace_id, &span.span_id).iter().rev() {
                stack.push(Step::Enter {
                    span: child,
                    parent: Some(slot),
                });
            }
        }

        root_slot
    }

    /// Slots are created in pre-order, so every child index is larger than its
    /// parent's and a reverse sweep assembles the trees bottom-up.
    fn into_flows(self, roots: &[usize]) -> (Vec<RequestFlow>, Vec<CycleDiagnostic>) {
        let mut built: Vec<Option<RequestFlow>> = Vec::with_capacity(self.slots.len());
        built.resize_with(self.slots.len(), || None);

        for (idx, slot) in self.slots.iter().enumerate().rev() {
            let children = slot
                .children
                .iter()
                .filter_map(|c| built[*c].take())
                .collect();
            built[idx] = Some(RequestFlow {
                service: slot.span.service_name.clone(),
                trace_id: slot.span.trace_id.clone(),
                span_id: slot.span.span_id.clone(),
                operation: slot.span.operation(),
                duration_ms: slot.span.duration_ms(),
                truncated: slot.truncated,
                children,
            });
        }

        let flows = roots.iter().filter_map(|r| built[*r].take()).collect();
        (flows, self.diagnostics)
    }
}

/// Rebuilds the call tree of every entry span in the snapshot.
///
/// Roots come first, ordered by `(timestamp, trace_id, span_id)`. Spans that no
/// root reaches can only sit on a parent cycle; each such group is promoted to
/// a root of its own so no span goes missing from the forest.
pub fn build_topology<'a>(spans: &'a [SpanRecord], index: &SpanIndex<'a>) -> Topology {
    let mut roots = spans.iter().filter(|s| index.is_root(s)).collect::<Vec<_>>();
    roots.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.trace_id.cmp(&b.trace_id))
            .then_with(|| a.span_id.cmp(&b.span_id))
    });

    let mut walker = Walker {
        index,
        slots: Vec::with_capacity(spans.len()),
        visited: HashSet::with_capacity(spans.len()),
        diagnostics: Vec::new(),
    };

    // Every root row is expanded, even when a duplicate of its key was already
    // visited.
    let mut root_slots = Vec::with_capacity(roots.len());
    for root in roots {
        root_slots.push(walker.expand(root));
    }

    let mut orphans = spans
        .iter()
        .filter(|s| !walker.visited.contains(&key(s)))
        .collect::<Vec<_>>();
    orphans.sort_by(|a, b| key(a).cmp(&key(b)));
    for orphan in orphans {
        if walker.visited.contains(&key(orphan)) {
            continue;
        }
        root_slots.push(walker.expand(orphan));
    }

    let (flows, diagnostics) = walker.into_flows(&root_slots);
    Topology { flows, diagnostics }
}

#[cfg(test)]
mod tests {
    use testkit::SpanBuilder;

    use super::*;

    fn topology(spans: &[SpanRecord]) -> Topology {
        let index = SpanIndex::build(spans);
        build_topology(spans, &index)
    }

    #[test]
    fn empty_input_has_no_flows() {
        let topo = topology(&[]);
        assert!(topo.flows.is_empty());
        assert!(topo.diagnostics.is_empty());
    }

    #[test]
    fn builds_nested_tree() {
        let spans = vec![
            SpanBuilder::new("t1", "root", "frontend").build(),
            SpanBuilder::new("t1", "api", "api").parent("root").at_ms(1).build(),
            SpanBuilder::new("t1", "db", "postgres").parent("api").at_ms(2).build(),
            SpanBuilder::new("t1", "cache", "redis").parent("api").at_ms(3).build(),
        ];

        let topo = topology(&spans);
        assert_eq!(topo.flows.len(), 1);
        let root = &topo.flows[0];
        assert_eq!(root.service, "frontend");
        assert_eq!(root.size(), 4);
        assert_eq!(root.depth(), 3);
        let api = &root.children[0];
        let kids = api.children.iter().map(|c| c.service.as_str()).collect::<Vec<_>>();
        assert_eq!(kids, vec!["postgres", "redis"]);
        assert!(topo.diagnostics.is_empty());
    }

    #[test]
    fn dangling_parent_is_a_root() {
        let spans = vec![
            SpanBuilder::new("t1", "b", "api").parent("uninstrumented").build(),
            SpanBuilder::new("t1", "c", "db").parent("b").build(),
        ];
        let topo = topology(&spans);
        assert_eq!(topo.flows.len(), 1);
        assert_eq!(topo.flows[0].span_id, "b");
        assert_eq!(topo.flows[0].children[0].span_id, "c");
    }

    #[test]
    fn self_parented_span_triggers_cycle_guard() {
        let spans = vec![SpanBuilder::new("t1", "loop", "api").parent("loop").build()];

        let topo = topology(&spans);
        assert_eq!(topo.flows.len(), 1);
        assert!(topo.flows[0].truncated);
        assert!(topo.flows[0].children.is_empty());
        assert_eq!(
            topo.diagnostics,
            vec![CycleDiagnostic {
                trace_id: "t1".into(),
                span_id: "loop".into(),
            }]
        );
    }

    #[test]
    fn unreachable_cycle_is_promoted_and_cut() {
        let spans = vec![
            SpanBuilder::new("t1", "ok", "api").build(),
            SpanBuilder::new("t1", "x", "a").parent("y").build(),
            SpanBuilder::new("t1", "y", "b").parent("x").build(),
            SpanBuilder::new("t1", "z", "c").parent("y").build(),
        ];

        let topo = topology(&spans);
        assert_eq!(topo.flows.len(), 2);
        assert_eq!(topo.flows[0].span_id, "ok");
        let promoted = &topo.flows[1];
        assert_eq!(promoted.span_id, "x");
        assert_eq!(promoted.size(), 3);
        assert_eq!(topo.diagnostics.len(), 1);
        assert_eq!(topo.diagnostics[0].span_id, "x");
    }

    #[test]
    fn deep_chain_does_not_recurse() {
        let depth = 50_000;
        let mut spans = vec![SpanBuilder::new("t1", "s0", "svc0").build()];
        for i in 1..depth {
            spans.push(
                SpanBuilder::new("t1", &format!("s{i}"), &format!("svc{}", i % 3))
                    .parent(&format!("s{}", i - 1))
                    .build(),
            );
        }

        let topo = topology(&spans);
        assert_eq!(topo.flows.len(), 1);
        assert_eq!(topo.flows[0].depth(), depth);

        let raw = serde_json::to_vec(&topo.flows).unwrap();
        drop(topo);
        let back: Vec<RequestFlow> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back[0].size(), depth);
    }

    #[test]
    fn duplicated_root_rows_each_get_a_flow() {
        let spans = vec![
            SpanBuilder::new("t1", "root", "web").build(),
            SpanBuilder::new("t1", "root", "web").at_ms(1).build(),
            SpanBuilder::new("t1", "child", "api").parent("root").at_ms(2).build(),
        ];

        let topo = topology(&spans);
        assert_eq!(topo.flows.len(), 2);
        for flow in &topo.flows {
            assert_eq!(flow.span_id, "root");
            assert_eq!(flow.children.len(), 1);
            assert_eq!(flow.children[0].span_id, "child");
        }
        assert!(topo.diagnostics.is_empty());
    }

    #[test]
    fn separate_traces_reusing_span_ids_stay_apart() {
        let spans = vec![
            SpanBuilder::new("t1", "root", "web").build(),
            SpanBuilder::new("t1", "child", "api").parent("root").build(),
            SpanBuilder::new("t2", "root", "cron").at_ms(5).build(),
            SpanBuilder::new("t2", "child", "batch").parent("root").at_ms(6).build(),
        ];

        let topo = topology(&spans);
        assert_eq!(topo.flows.len(), 2);
        assert_eq!(topo.flows[0].children[0].service, "api");
        assert_eq!(topo.flows[1].children[0].service, "batch");
    }
}
