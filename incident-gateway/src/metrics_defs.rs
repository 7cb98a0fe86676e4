use shared::metrics_defs::{MetricDef, MetricType};

pub const INCIDENT_REQUESTS: MetricDef = MetricDef {
    name: "incidents.requests",
    metric_type: MetricType::Counter,
    description: "Incident create requests handled. Tagged with route, status.",
};

pub const INCIDENT_REQUEST_DURATION: MetricDef = MetricDef {
    name: "incidents.request.duration",
    metric_type: MetricType::Histogram,
    description: "Incident create request duration in seconds. Tagged with route.",
};

pub const USER_LOOKUPS: MetricDef = MetricDef {
    name: "user_lookup.requests",
    metric_type: MetricType::Counter,
    description: "User service lookups. Tagged with status.",
};

pub const BACKEND_REQUESTS: MetricDef = MetricDef {
    name: "backend.requests",
    metric_type: MetricType::Counter,
    description: "Attempts against an incident service. Tagged with backend, outcome.",
};

pub const BACKEND_REQUEST_DURATION: MetricDef = MetricDef {
    name: "backend.request.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a single incident service attempt in seconds. Tagged with backend.",
};

pub const BACKEND_FAILOVER: MetricDef = MetricDef {
    name: "backend.failover",
    metric_type: MetricType::Counter,
    description: "Creates retried against the redundant incident service",
};

pub const ALL_METRICS: &[MetricDef] = &[
    INCIDENT_REQUESTS,
    INCIDENT_REQUEST_DURATION,
    USER_LOOKUPS,
    BACKEND_REQUESTS,
    BACKEND_REQUEST_DURATION,
    BACKEND_FAILOVER,
];
