use std::collections::HashMap;

use otelmap_core::model::span::SpanRecord;

/// Lookup tables over one span snapshot, keyed by `(trace_id, span_id)`.
///
/// Span ids are only unique within a trace, so every lookup goes through the
/// trace first.
#[derive(Debug, Default)]
pub struct SpanIndex<'a> {
    traces: HashMap<&'a str, TraceIndex<'a>>,
    len: usize,
}

#[derive(Debug, Default)]
struct TraceIndex<'a> {
    spans: HashMap<&'a str, &'a SpanRecord>,
    children: HashMap<&'a str, Vec<&'a SpanRecord>>,
}

impl<'a> SpanIndex<'a> {
    pub fn build(spans: &'a [SpanRecord]) -> Self {
        let mut traces: HashMap<&'a str, TraceIndex<'a>> = HashMap::new();
        for span in spans {
            let trace = traces.entry(span.trace_id.as_str()).or_default();
            // First occurrence wins for duplicated ids.
            trace.spans.entry(span.span_id.as_str()).or_insert(span);
            if span.has_parent() {
                trace
                    .children
                    .entry(span.parent_span_id.as_str())
                    .or_default()
                    .push(span);
            }
        }

        for trace in traces.values_mut() {
            for children in trace.children.values_mut() {
                children.sort_by(|a, b| {
                    a.timestamp
                        .cmp(&b.timestamp)
                        .then_with(|| a.span_id.cmp(&b.span_id))
                });
            }
        }

        Self {
            traces,
            len: spans.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, trace_id: &str, span_id: &str) -> Option<&'a SpanRecord> {
        self.traces
            .get(trace_id)
            .and_then(|t| t.spans.get(span_id))
            .copied()
    }

    pub fn service_of(&self, trace_id: &str, span_id: &str) -> Option<&'a str> {
        self.get(trace_id, span_id)
            .map(|s| s.service_name.as_str())
    }

    /// Service of `span`'s parent, if the parent is in the snapshot and names one.
    pub fn parent_service(&self, span: &SpanRecord) -> Option<&'a str> {
        if !span.has_parent() {
            return None;
        }
        self.service_of(&span.trace_id, &span.parent_span_id)
            .filter(|service| !service.is_empty())
    }

    /// Direct children of a span, ordered by `(timestamp, span_id)`.
    pub fn children_of(&self, trace_id: &str, span_id: &str) -> &[&'a SpanRecord] {
        self.traces
            .get(trace_id)
            .and_then(|t| t.children.get(span_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Entry points: no parent, a parent outside the snapshot, or a span naming itself.
    pub fn is_root(&self, span: &SpanRecord) -> bool {
        !span.has_parent()
            || span.is_self_parented()
            || self.get(&span.trace_id, &span.parent_span_id).is_none()
    }
}

#[cfg(test)]
mod tests {
    use testkit::SpanBuilder;

    use super::*;

    #[test]
    fn empty_input_yields_empty_index() {
        let index = SpanIndex::build(&[]);
        assert!(index.is_empty());
        assert!(index.get("t1", "a").is_none());
        assert!(index.children_of("t1", "a").is_empty());
    }

    #[test]
    fn lookups_are_scoped_to_trace() {
        let spans = vec![
            SpanBuilder::new("t1", "a", "frontend").build(),
            SpanBuilder::new("t2", "a", "billing").build(),
            SpanBuilder::new("t1", "b", "api").parent("a").build(),
        ];
        let index = SpanIndex::build(&spans);

        assert_eq!(index.service_of("t1", "a"), Some("frontend"));
        assert_eq!(index.service_of("t2", "a"), Some("billing"));
        assert_eq!(index.parent_service(&spans[2]), Some("frontend"));
        assert_eq!(index.children_of("t1", "a").len(), 1);
        assert!(index.children_of("t2", "a").is_empty());
    }

    #[test]
    fn children_are_ordered_by_time_then_id() {
        let spans = vec![
            SpanBuilder::new("t1", "root", "api").build(),
            SpanBuilder::new("t1", "c", "db").parent("root").at_ms(20).build(),
            SpanBuilder::new("t1", "b", "db").parent("root").at_ms(10).build(),
            SpanBuilder::new("t1", "a", "db").parent("root").at_ms(20).build(),
        ];
        let index = SpanIndex::build(&spans);
        let ids = index
            .children_of("t1", "root")
            .iter()
            .map(|s| s.span_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn roots_include_dangling_and_self_parented_spans() {
        let spans = vec![
            SpanBuilder::new("t1", "a", "api").build(),
            SpanBuilder::new("t1", "b", "api").parent("missing").build(),
            SpanBuilder::new("t1", "c", "api").parent("c").build(),
            SpanBuilder::new("t1", "d", "api").parent("a").build(),
        ];
        let index = SpanIndex::build(&spans);
        let roots = spans
            .iter()
            .filter(|s| index.is_root(s))
            .map(|s| s.span_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(roots, vec!["a", "b", "c"]);
    }

    #[test]
    fn parent_with_empty_service_does_not_resolve() {
        let spans = vec![
            SpanBuilder::new("t1", "a", "").build(),
            SpanBuilder::new("t1", "b", "api").parent("a").build(),
        ];
        let index = SpanIndex::build(&spans);
        assert_eq!(index.parent_service(&spans[1]), None);
    }
}
