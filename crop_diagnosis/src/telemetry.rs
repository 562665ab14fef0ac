use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};

const STAGE_DURATION_BOUNDARIES_MS: [f64; 12] = [
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
];

pub struct Metrics {
    request_counter: Counter<u64>,
    stage_duration: Histogram<u64>,
    report_failures: Counter<u64>,
    recommendation_fallbacks: Counter<u64>,
    registry: Registry,
    _provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("crop_diagnosis");
        global::set_meter_provider(provider.clone());

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let stage_duration = meter
            .u64_histogram("stage_duration_ms")
            .with_boundaries(STAGE_DURATION_BOUNDARIES_MS.to_vec())
            .with_description("Duration of pipeline stages in milliseconds")
            .build();

        let report_failures = meter
            .u64_counter("report_failures_total")
            .with_description("Reports that could not be rendered")
            .build();

        let recommendation_fallbacks = meter
            .u64_counter("recommendation_fallbacks_total")
            .with_description("Recommendations served from the static templates")
            .build();

        Ok(Metrics {
            request_counter,
            stage_duration,
            report_failures,
            recommendation_fallbacks,
            registry,
            _provider: provider,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_stage_duration(&self, stage: &str, duration_ms: u64) {
        let attributes = vec![KeyValue::new("stage", stage.to_string())];
        self.stage_duration.record(duration_ms, &attributes);
    }

    pub fn record_report_failure(&self) {
        self.report_failures.add(1, &[]);
    }

    pub fn record_recommendation_fallback(&self) {
        self.recommendation_fallbacks.add(1, &[]);
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
