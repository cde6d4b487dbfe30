use std::collections::BTreeMap;

use otelmap_core::model::span::SpanRecord;

use crate::percentile::Percentiles;

/// Request statistics of one service, counted over its SERVER spans only.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStats {
    pub service: String,
    pub requests: u64,
    pub errors: u64,
    pub latency_ms_avg: i64,
    pub percentiles: Percentiles,
}

impl ServiceStats {
    pub fn error_rate(&self) -> f64 {
        ratio(self.errors, self.requests)
    }

    pub fn rps(&self, window_seconds: f64) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.requests as f64 / window_seconds
    }
}

#[derive(Debug, Default)]
struct ServiceAccumulator {
    requests: u64,
    latency_sum_ms: i64,
    errors: u64,
    durations_ms: Vec<i64>,
}

impl ServiceAccumulator {
    fn record(&mut self, span: &SpanRecord) {
        let duration_ms = span.duration_ms();
        self.requests += 1;
        self.latency_sum_ms += duration_ms;
        self.durations_ms.push(duration_ms);
        if span.is_server_error() {
            self.errors += 1;
        }
    }

    fn finish(self, service: &str) -> ServiceStats {
        let latency_ms_avg = if self.requests == 0 {
            0
        } else {
            self.latency_sum_ms / self.requests as i64
        };
        ServiceStats {
            service: service.to_string(),
            requests: self.requests,
            errors: self.errors,
            latency_ms_avg,
            percentiles: Percentiles::from_samples(&self.durations_ms),
        }
    }
}

/// Groups spans by owning service, sorted by service name.
///
/// Non-SERVER spans never count as requests. With `include_client_only` they
/// still register their service, which then reports zero traffic.
pub fn aggregate_services(spans: &[SpanRecord], include_client_only: bool) -> Vec<ServiceStats> {
    let mut services: BTreeMap<&str, ServiceAccumulator> = BTreeMap::new();
    for span in spans {
        if span.service_name.is_empty() {
            continue;
        }
        if span.is_server() {
            services
                .entry(span.service_name.as_str())
                .or_default()
                .record(span);
        } else if include_client_only {
            services.entry(span.service_name.as_str()).or_default();
        }
    }

    services
        .into_iter()
        .map(|(service, acc)| acc.finish(service))
        .collect()
}

pub(crate) fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}
