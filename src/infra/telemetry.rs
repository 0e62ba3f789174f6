use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every cache metric with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "mapcache_hit_total",
            Unit::Count,
            "Total number of lookups that found a value."
        );
        describe_counter!(
            "mapcache_miss_total",
            Unit::Count,
            "Total number of lookups that found nothing or a cached miss."
        );
        describe_counter!(
            "mapcache_evict_total",
            Unit::Count,
            "Total number of entries evicted due to capacity, by policy."
        );
        describe_counter!(
            "mapcache_flush_total",
            Unit::Count,
            "Total number of scheduled full flushes."
        );
        describe_counter!(
            "mapcache_lock_timeout_total",
            Unit::Count,
            "Total number of population lock waits that timed out."
        );
    });
}
