use std::{future::IntoFuture, sync::Arc, time::Duration};

use anyhow::Result;
use byte_unit::{Byte, UnitType};
use coarsetime::Instant;
use derive_builder::Builder;
use kanal::{AsyncSender, unbounded_async};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    AppendFields, FlushOutcome, LogEntry,
    buffer::LogBuffer,
    dispatcher::FlushTimerTaskBuilder,
    sender::{HttpLogSender, LogGroup, LogSink},
    statistics::{DeliveryReport, StatisticsTaskBuilder},
};

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Settings of a [`LogForwarder`], fixed once it is started.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct ForwarderSettings {
    #[builder(setter(into))]
    pub endpoint: String,
    #[builder(setter(into))]
    pub topic_id: String,
    /// Buffered entries that trigger a flush
    #[builder(default = "100")]
    pub max_count: usize,
    /// Buffered MB (summed JSON length of the entries) that trigger a flush
    #[builder(default = "0.1")]
    pub max_size: f64,
    /// Extra attempts per request made by the HTTP sender
    #[builder(default = "2")]
    pub retry_count: u32,
    #[builder(default = "Duration::from_millis(5000)")]
    pub flush_interval: Duration,
    #[builder(default = "Duration::from_secs(10)")]
    pub request_timeout: Duration,
    /// Name of the shipped log group
    #[builder(setter(into), default = "String::from(\"127.0.0.1\")")]
    pub source: String,
    /// Seconds between two statistics summaries, 0 disables them
    #[builder(default)]
    pub stats_interval: u64,
    #[builder(setter(into), default = "String::from(\"ap-guangzhou\")")]
    pub region: String,
}

impl ForwarderSettingsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_count == Some(0) {
            return Err("max_count must be greater than 0".to_owned());
        }
        if let Some(max_size) = self.max_size {
            if max_size.is_nan() || max_size <= 0. {
                return Err(format!("max_size must be positive, got {max_size}"));
            }
        }
        if self.flush_interval == Some(Duration::ZERO) {
            return Err("flush_interval must not be zero".to_owned());
        }
        Ok(())
    }
}

impl ForwarderSettings {
    pub fn max_size_bytes(&self) -> usize {
        (self.max_size * BYTES_PER_MB) as usize
    }
}

/// State shared by the forwarder handle, the timer task and threshold flushes
pub(crate) struct Shared<S, A> {
    buffer: Mutex<LogBuffer>,
    sink: S,
    fields: A,
    topic_id: String,
    source: String,
    stats_tx: Option<AsyncSender<FlushOutcome>>,
}

impl<S, A> Shared<S, A>
where
    S: LogSink,
    A: AppendFields,
{
    pub(crate) async fn flush(&self) {
        let batch = self.buffer.lock().take();
        if batch.is_empty() {
            return;
        }

        let started = Instant::now();
        let group = LogGroup::new(self.source.clone(), batch.to_records(&self.fields.fields()));

        match self.sink.send(&self.topic_id, group).await {
            Ok(()) => {
                debug!("{} log entries shipped", batch.len());
                let report = DeliveryReport::new(
                    started,
                    Instant::now(),
                    batch.len(),
                    batch.serialized_bytes(),
                );
                self.report(FlushOutcome::Delivered(report)).await;
            }
            Err(err) => {
                let entries = batch.len();
                let (buffered, buffered_bytes) = {
                    let mut buffer = self.buffer.lock();
                    buffer.restore_front(batch);
                    (buffer.len(), buffer.serialized_bytes())
                };
                warn!(
                    "Failed to ship {} log entries, {} kept for the next flush ({}): {}",
                    entries,
                    buffered,
                    Byte::from_u64(buffered_bytes as u64).get_appropriate_unit(UnitType::Binary),
                    err
                );
                self.report(FlushOutcome::Failed { entries }).await;
            }
        }
    }

    #[inline]
    async fn report(&self, outcome: FlushOutcome) {
        if let Some(stats_tx) = &self.stats_tx {
            let _ = stats_tx.send(outcome).await;
        }
    }
}

/// Buffers log entries and ships them in batches to a [`LogSink`].
///
/// Flushes happen when the buffer reaches the count or size threshold, every
/// `flush_interval`, and once more on [`LogForwarder::close`]. Batches that fail
/// to deliver are put back in front of the buffer, so delivery is at least once
/// and keeps the original order. Nothing bounds the buffer while the sink keeps
/// failing.
pub struct LogForwarder<S: LogSink, A: AppendFields> {
    shared: Arc<Shared<S, A>>,
    runtime: Handle,
    max_count: usize,
    max_size_bytes: usize,
    timer_token: CancellationToken,
    stats_token: CancellationToken,
    timer_task: Mutex<Option<JoinHandle<()>>>,
    stats_task: Mutex<Option<JoinHandle<()>>>,
}

impl<A: AppendFields> LogForwarder<HttpLogSender, A> {
    /// Start a forwarder uploading to the CLS endpoint named in `settings`.
    pub fn connect(settings: ForwarderSettings, fields: A) -> Result<Self> {
        let sink = HttpLogSender::from_settings(&settings);
        Self::start(settings, sink, fields)
    }
}

impl<S: LogSink, A: AppendFields> LogForwarder<S, A> {
    /// Start a forwarder and its periodic flush timer.
    ///
    /// Must be called from within a tokio runtime; later flushes are spawned on
    /// that runtime even when [`LogForwarder::write`] is called from elsewhere.
    pub fn start(settings: ForwarderSettings, sink: S, fields: A) -> Result<Self> {
        let runtime = Handle::try_current()?;
        let timer_token = CancellationToken::new();
        let stats_token = CancellationToken::new();

        let (stats_tx, stats_task) = if settings.stats_interval > 0 {
            let (stats_tx, stats_rx) = unbounded_async();
            let task = StatisticsTaskBuilder::default()
                .shutdown_token(stats_token.clone())
                .stats_rx(stats_rx)
                .timeout(settings.stats_interval)
                .build()?;
            (Some(stats_tx), Some(task))
        } else {
            (None, None)
        };

        let shared = Arc::new(Shared {
            buffer: Mutex::new(LogBuffer::default()),
            sink,
            fields,
            topic_id: settings.topic_id.clone(),
            source: settings.source.clone(),
            stats_tx,
        });

        let timer_task = FlushTimerTaskBuilder::default()
            .shutdown_token(timer_token.clone())
            .shared(shared.clone())
            .period(settings.flush_interval)
            .build()?;

        let timer_task = runtime.spawn(timer_task.into_future());
        let stats_task = stats_task.map(|task| runtime.spawn(task.into_future()));

        let max_size_bytes = settings.max_size_bytes();
        info!(
            "Forwarding logs to topic {} in region {}: flush every {} ms, {} entries or {}",
            settings.topic_id,
            settings.region,
            settings.flush_interval.as_millis(),
            settings.max_count,
            Byte::from_u64(max_size_bytes as u64).get_appropriate_unit(UnitType::Binary)
        );

        Ok(Self {
            shared,
            runtime,
            max_count: settings.max_count,
            max_size_bytes,
            timer_token,
            stats_token,
            timer_task: Mutex::new(Some(timer_task)),
            stats_task: Mutex::new(stats_task),
        })
    }

    /// Buffer an entry. Never blocks on I/O and never fails; when the buffer
    /// crosses a threshold a flush is spawned in the background.
    pub fn write(&self, entry: LogEntry) {
        let should_flush = {
            let mut buffer = self.shared.buffer.lock();
            buffer.push(entry);
            buffer.should_flush(self.max_count, self.max_size_bytes)
        };

        if should_flush {
            let shared = self.shared.clone();
            self.runtime.spawn(async move { shared.flush().await });
        }
    }

    /// Ship everything currently buffered. A no-op on an empty buffer.
    pub async fn flush(&self) {
        self.shared.flush().await
    }

    /// Stop the periodic timer and make one last flush attempt.
    pub async fn close(&self) {
        self.timer_token.cancel();
        let timer_task = self.timer_task.lock().take();
        if let Some(task) = timer_task {
            let _ = task.await;
        }

        self.shared.flush().await;

        self.stats_token.cancel();
        let stats_task = self.stats_task.lock().take();
        if let Some(task) = stats_task {
            let _ = task.await;
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    pub fn buffered_messages(&self) -> Vec<String> {
        self.shared.buffer.lock().messages()
    }
}

impl<S: LogSink, A: AppendFields> Drop for LogForwarder<S, A> {
    fn drop(&mut self) {
        self.timer_token.cancel();
        self.stats_token.cancel();
        [self.timer_task.get_mut().take(), self.stats_task.get_mut().take()]
            .into_iter()
            .flatten()
            .for_each(|task| task.abort());
    }
}
