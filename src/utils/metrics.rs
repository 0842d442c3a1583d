//! Prometheus metrics
//!
//! Metric names live here so recording sites and dashboards agree. Recording
//! goes through the `metrics` facade and is a no-op until [`init_metrics`]
//! installs the exporter.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Label, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, info};

use crate::config::MetricsConfig;
use crate::utils::errors::{FlowBotError, Result};

/// Telegram update handling, labelled by `bot_name` and `bot_id`
pub mod updates {
    /// Updates received
    pub const UPDATES_TOTAL: &str = "flowbot_telegrambots_updates_total";
    /// Updates currently being processed
    pub const UPDATES_IN_PROGRESS: &str = "flowbot_telegrambots_updates_in_progress";
    /// Time spent handling one update, delivery included
    pub const UPDATE_PROCESS_DURATION_SECONDS: &str =
        "flowbot_telegrambots_update_process_duration_seconds";
    /// Updates whose handling ended in an error
    pub const UPDATES_EXCEPTION_HANDLING: &str = "flowbot_telegrambots_updates_exception_handling";
}

/// Host-wide gauges
pub mod host {
    /// Bots launched and polling
    pub const BOTS_ONLINE: &str = "flowbot_telegrambots_bots_online";
}

/// Flow engine
pub mod flow {
    /// Step actions run, root actions included
    pub const STEPS_EXECUTED_TOTAL: &str = "flowbot_flow_steps_executed_total";
}

pub const BOT_NAME_LABEL: &str = "bot_name";
pub const BOT_ID_LABEL: &str = "bot_id";

/// Install the Prometheus exporter when enabled.
///
/// Returns whether an exporter is now listening.
pub fn init_metrics(config: &MetricsConfig) -> Result<bool> {
    if !config.enable {
        debug!("Metrics exporter is disabled");
        return Ok(false);
    }

    let address = config.listen_address()?;
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| FlowBotError::Metrics(format!("Cannot start exporter on {}: {}", address, e)))?;
    describe_metrics();

    info!(address = %address, "Metrics exporter started");
    Ok(true)
}

/// Register help text for every metric
pub fn describe_metrics() {
    describe_counter!(updates::UPDATES_TOTAL, "Total number of updates received by all bots.");
    describe_gauge!(updates::UPDATES_IN_PROGRESS, "Number of updates in process by all bots.");
    describe_histogram!(
        updates::UPDATE_PROCESS_DURATION_SECONDS,
        Unit::Seconds,
        "Time to process an update, including routing and reply delivery."
    );
    describe_counter!(
        updates::UPDATES_EXCEPTION_HANDLING,
        "Number of updates whose handling failed."
    );
    describe_gauge!(host::BOTS_ONLINE, "Number of bots online.");
    describe_counter!(flow::STEPS_EXECUTED_TOTAL, "Flow step actions executed.");
}

/// A bot went online
pub fn bot_online() {
    gauge!(host::BOTS_ONLINE).increment(1.0);
}

/// Tracks one update from arrival until it is dropped
pub struct UpdateTimer {
    labels: Vec<Label>,
    started: Instant,
}

impl UpdateTimer {
    /// Count the update and mark it in progress
    pub fn start(bot_name: &str, bot_id: i64) -> Self {
        let labels = vec![
            Label::new(BOT_NAME_LABEL, bot_name.to_string()),
            Label::new(BOT_ID_LABEL, bot_id.to_string()),
        ];
        counter!(updates::UPDATES_TOTAL, labels.clone()).increment(1);
        gauge!(updates::UPDATES_IN_PROGRESS, labels.clone()).increment(1.0);
        Self {
            labels,
            started: Instant::now(),
        }
    }

    pub fn failed(&self) {
        counter!(updates::UPDATES_EXCEPTION_HANDLING, self.labels.clone()).increment(1);
    }
}

impl Drop for UpdateTimer {
    fn drop(&mut self) {
        histogram!(updates::UPDATE_PROCESS_DURATION_SECONDS, self.labels.clone())
            .record(self.started.elapsed().as_secs_f64());
        gauge!(updates::UPDATES_IN_PROGRESS, self.labels.clone()).decrement(1.0);
    }
}
