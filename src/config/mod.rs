use std::{sync::Arc, time::Duration};

use anyhow::Result;
use envconfig::Envconfig;
use log::info;

use crate::{
    AppendFields, LogEntry,
    forwarder::{ForwarderSettings, ForwarderSettingsBuilder, LogForwarder},
    sender::LogSink,
};

/// Environment variables configuring the CLS forwarder
#[derive(Envconfig, Debug)]
pub struct ClsEnvVars {
    #[envconfig(from = "CLS_ENDPOINT")]
    pub endpoint: Option<String>,

    #[envconfig(from = "CLS_TOPIC_ID")]
    pub topic_id: Option<String>,

    #[envconfig(from = "CLS_MAX_COUNT", default = "100")]
    pub max_count: usize,

    #[envconfig(from = "CLS_MAX_SIZE", default = "0.1")]
    pub max_size: f64,

    #[envconfig(from = "CLS_REGION", default = "ap-guangzhou")]
    pub region: String,

    #[envconfig(from = "CLS_RETRY_COUNT", default = "2")]
    pub retry_count: u32,

    #[envconfig(from = "CLS_FLUSH_INTERVAL_MS", default = "5000")]
    pub flush_interval_ms: u64,

    #[envconfig(from = "CLS_SOURCE", default = "127.0.0.1")]
    pub source: String,

    #[envconfig(from = "CLS_STATS_INTERVAL", default = "0")]
    pub stats_interval: u64,
}

impl ClsEnvVars {
    /// Settings for a forwarder, or `None` when endpoint or topic is not configured.
    pub fn forwarder_settings(&self) -> Result<Option<ForwarderSettings>> {
        let endpoint = self.endpoint.as_deref().map(str::trim).unwrap_or_default();
        let topic_id = self.topic_id.as_deref().map(str::trim).unwrap_or_default();

        if endpoint.is_empty() || topic_id.is_empty() {
            info!("CLS_ENDPOINT or CLS_TOPIC_ID not set, log forwarding disabled");
            return Ok(None);
        }

        let settings = ForwarderSettingsBuilder::default()
            .endpoint(endpoint)
            .topic_id(topic_id)
            .max_count(self.max_count)
            .max_size(self.max_size)
            .region(self.region.clone())
            .retry_count(self.retry_count)
            .flush_interval(Duration::from_millis(self.flush_interval_ms))
            .source(self.source.clone())
            .stats_interval(self.stats_interval)
            .build()?;

        Ok(Some(settings))
    }
}

/// A forwarder that may not be configured. Writes to an empty slot are dropped.
pub struct ForwarderSlot<S: LogSink, A: AppendFields> {
    forwarder: Option<Arc<LogForwarder<S, A>>>,
}

impl<S: LogSink, A: AppendFields> ForwarderSlot<S, A> {
    pub fn new(forwarder: Option<Arc<LogForwarder<S, A>>>) -> Self {
        Self { forwarder }
    }

    pub fn is_active(&self) -> bool {
        self.forwarder.is_some()
    }

    pub fn forwarder(&self) -> Option<&Arc<LogForwarder<S, A>>> {
        self.forwarder.as_ref()
    }

    pub fn write(&self, entry: LogEntry) {
        if let Some(forwarder) = &self.forwarder {
            forwarder.write(entry);
        }
    }

    pub async fn close(&self) {
        if let Some(forwarder) = &self.forwarder {
            forwarder.close().await;
        }
    }
}
