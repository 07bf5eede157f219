use std::rc::Rc;
use std::time::{Duration, Instant};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use once_cell::sync::Lazy;
use prometheus::{
    core::Collector, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, TextEncoder,
};

/// Registers a collector with the default registry and hands it back.
///
/// A duplicate registration only loses the export, never the counting.
fn registered<C>(collector: C) -> C
where
    C: Collector + Clone + 'static,
{
    if let Err(err) = prometheus::default_registry().register(Box::new(collector.clone())) {
        tracing::warn!(error = %err, "failed to register metric");
    }
    collector
}

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    registered(
        IntCounterVec::new(
            Opts::new(
                "dashboard_sync_http_requests_total",
                "HTTP requests by route group",
            ),
            &["method", "route", "status"],
        )
        .expect("valid dashboard_sync_http_requests_total"),
    )
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    registered(
        HistogramVec::new(
            HistogramOpts::new(
                "dashboard_sync_http_request_duration_seconds",
                "HTTP handling latency by route group; /ws measures the upgrade only",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["method", "route"],
        )
        .expect("valid dashboard_sync_http_request_duration_seconds"),
    )
});

static HUB_ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    registered(
        IntGauge::new(
            "dashboard_sync_hub_active_connections",
            "Live connections registered with the room hub",
        )
        .expect("valid dashboard_sync_hub_active_connections"),
    )
});

static HUB_JOINS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    registered(
        IntCounterVec::new(
            Opts::new("dashboard_sync_hub_joins_total", "Accepted room join requests"),
            &["kind"],
        )
        .expect("valid dashboard_sync_hub_joins_total"),
    )
});

static HUB_NOTIFICATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    registered(
        IntCounterVec::new(
            Opts::new(
                "dashboard_sync_hub_notifications_total",
                "Update notifications by outcome: rejected, empty, failed, delivered",
            ),
            &["outcome"],
        )
        .expect("valid dashboard_sync_hub_notifications_total"),
    )
});

static HUB_DELIVERIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    registered(
        IntCounter::new(
            "dashboard_sync_hub_deliveries_total",
            "UPDATED_CONFIG events handed to member connections",
        )
        .expect("valid dashboard_sync_hub_deliveries_total"),
    )
});

static HUB_DELIVERY_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    registered(
        IntCounterVec::new(
            Opts::new(
                "dashboard_sync_hub_delivery_failures_total",
                "Per-recipient delivery failures",
            ),
            &["reason"],
        )
        .expect("valid dashboard_sync_hub_delivery_failures_total"),
    )
});

/// Collapses a matched route pattern into a fixed label set, so room ids
/// never become label values.
pub fn route_label(pattern: Option<&str>) -> &'static str {
    match pattern {
        Some("/ws") => "ws",
        Some("/internal/v1/updates") | Some("/internal/v1/rooms/{room_id}/{source}") => "updates",
        Some("/api/v1/rooms/{room_id}") => "room",
        Some("/api/v1/hub/stats") => "stats",
        Some("/health") | Some("/metrics") => "ops",
        Some(_) => "other",
        None => "unmatched",
    }
}

pub fn observe_http_request(method: &str, route: &str, status: u16, elapsed: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, route, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, route])
        .observe(elapsed.as_secs_f64());
}

pub fn set_active_connections(count: usize) {
    HUB_ACTIVE_CONNECTIONS.set(count as i64);
}

pub fn record_join(newly_joined: bool) {
    let kind = if newly_joined { "new" } else { "repeat" };
    HUB_JOINS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_notification(outcome: &str) {
    HUB_NOTIFICATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_deliveries(count: usize) {
    HUB_DELIVERIES_TOTAL.inc_by(count as u64);
}

pub fn record_delivery_failure(reason: &str) {
    HUB_DELIVERY_FAILURES_TOTAL
        .with_label_values(&[reason])
        .inc();
}

/// GET /metrics
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Records request count and latency per route group
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let route = route_label(req.match_pattern().as_deref());
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let status = result
                .as_ref()
                .map(|res| res.status().as_u16())
                .unwrap_or(500);
            observe_http_request(&method, route, status, start.elapsed());
            result
        })
    }
}
