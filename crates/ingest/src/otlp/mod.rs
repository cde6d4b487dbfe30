pub mod decode;
pub mod grpc;
pub mod http;

use otelmap_core::config::{DEFAULT_SESSION_ATTRIBUTE, DEFAULT_SESSION_HEADER};
use otelmap_core::model::span::SpanRecord;

/// Where session tokens are looked up on ingested spans, and which request
/// header may supply one for spans that carry none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTagging {
    pub attribute_key: String,
    pub header: String,
}

impl Default for SessionTagging {
    fn default() -> Self {
        Self {
            attribute_key: DEFAULT_SESSION_ATTRIBUTE.to_string(),
            header: DEFAULT_SESSION_HEADER.to_string(),
        }
    }
}

impl SessionTagging {
    /// Stamps `token` as a resource attribute on spans without a session.
    pub fn apply(&self, spans: &mut [SpanRecord], token: Option<&str>) {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return;
        };
        for span in spans {
            if span.session_token(&self.attribute_key).is_none() {
                span.resource_attributes
                    .insert(self.attribute_key.clone(), token.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use testkit::SpanBuilder;

    use super::*;

    #[test]
    fn header_token_fills_only_untagged_spans() {
        let tagging = SessionTagging::default();
        let mut spans = vec![
            SpanBuilder::new("t1", "a", "api").build(),
            SpanBuilder::new("t1", "b", "api").session("own").build(),
        ];

        tagging.apply(&mut spans, Some("from-header"));

        assert_eq!(spans[0].session_token(DEFAULT_SESSION_ATTRIBUTE), Some("from-header"));
        assert_eq!(spans[1].session_token(DEFAULT_SESSION_ATTRIBUTE), Some("own"));
    }

    #[test]
    fn blank_header_is_ignored() {
        let tagging = SessionTagging::default();
        let mut spans = vec![SpanBuilder::new("t1", "a", "api").build()];
        tagging.apply(&mut spans, Some("  "));
        assert!(spans[0].session_token(DEFAULT_SESSION_ATTRIBUTE).is_none());
    }
}
