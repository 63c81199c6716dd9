use std::{
    fmt::Display,
    future::{Future, IntoFuture},
    pin::Pin,
};

use byte_unit::{Byte, UnitType};
use coarsetime::{Duration, Instant};
use derive_builder::Builder;
use derive_new::new;
use itertools::{
    Itertools,
    MinMaxResult::{MinMax, NoElements, OneElement},
};
use kanal::AsyncReceiver;
use log::info;
use tokio::{select, time::interval_at};
use tokio_util::sync::CancellationToken;

use crate::FlushOutcome;

trait Stats {
    fn add_failure(&mut self, entries: usize);
    fn add_delivery(&mut self, report: DeliveryReport);
    fn calculate_and_reset(&mut self) -> Option<StatSummary>;
    fn calculate(&self) -> Option<StatSummary>;
    fn reset(&mut self);
}

#[derive(Debug, PartialEq)]
struct StatSummary {
    throughput: f32,
    min_latency: Duration,
    max_latency: Duration,
    average_latency: Duration,
    delivered_batches: usize,
    delivered_entries: usize,
    failed_batches: usize,
    failed_entries: usize,
}

impl Display for StatSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let min = self.min_latency.as_millis();
        let max = self.max_latency.as_millis();
        let average = self.average_latency.as_millis();

        let throughput = Byte::from_f32(self.throughput)
            .unwrap_or_default()
            .get_appropriate_unit(UnitType::Binary)
            .to_string();

        writeln!(
            f,
            "\nDelivered: {} entries in {} batches\nFailed: {} entries in {} batches\nThroughput: {throughput}/s\nFlush latency: <min: {min}, max: {max}, average: {average}> ms",
            self.delivered_entries, self.delivered_batches, self.failed_entries, self.failed_batches
        )
    }
}

#[derive(Clone, new)]
struct StatsHolder {
    period: Duration,
    #[new(default)]
    deliveries: Vec<DeliveryReport>,
    #[new(default)]
    failed_batches: usize,
    #[new(default)]
    failed_entries: usize,
}

impl Default for StatsHolder {
    fn default() -> Self {
        StatsHolder::new(Duration::new(10, 0))
    }
}

impl Stats for StatsHolder {
    fn add_failure(&mut self, entries: usize) {
        self.failed_batches += 1;
        self.failed_entries += entries;
    }

    fn add_delivery(&mut self, report: DeliveryReport) {
        self.deliveries.push(report);
    }

    fn calculate_and_reset(&mut self) -> Option<StatSummary> {
        let res = self.calculate();
        self.reset();
        res
    }

    fn calculate(&self) -> Option<StatSummary> {
        if self.deliveries.is_empty() && self.failed_batches == 0 {
            return None;
        }

        let latency = self
            .deliveries
            .iter()
            .map(|report| report.finished.duration_since(report.started));

        let (min_latency, max_latency) = match latency.clone().minmax() {
            NoElements => (Duration::new(0, 0), Duration::new(0, 0)),
            OneElement(elem) => (elem, elem),
            MinMax(min, max) => (min, max),
        };

        let average_latency = if self.deliveries.is_empty() {
            Duration::new(0, 0)
        } else {
            latency.fold(Duration::new(0, 0), |acc, e| acc + e) / self.deliveries.len() as u32
        };

        let mut throughput = self.deliveries.iter().map(|r| r.bytes).sum::<usize>() as f32;
        throughput /= self.period.as_secs().max(1) as f32;

        Some(StatSummary {
            throughput,
            min_latency,
            max_latency,
            average_latency,
            delivered_batches: self.deliveries.len(),
            delivered_entries: self.deliveries.iter().map(|r| r.entries).sum(),
            failed_batches: self.failed_batches,
            failed_entries: self.failed_entries,
        })
    }

    fn reset(&mut self) {
        self.deliveries.clear();
        self.failed_batches = 0;
        self.failed_entries = 0;
    }
}

/// Outcome of one successful flush
#[derive(Debug, Clone, Copy, new)]
pub(crate) struct DeliveryReport {
    started: Instant,
    finished: Instant,
    entries: usize,
    bytes: usize,
}

#[derive(Builder)]
#[builder(pattern = "owned")]
pub(crate) struct StatisticsTask {
    shutdown_token: CancellationToken,
    stats_rx: AsyncReceiver<FlushOutcome>,
    #[builder(setter(custom))]
    timeout: Duration,
    #[builder(private)]
    holder: StatsHolder,
}

impl StatisticsTaskBuilder {
    pub(crate) fn timeout(mut self, stats_interval: u64) -> Self {
        let timeout = Duration::new(stats_interval, 0);
        self.timeout = Some(timeout);
        self.holder = Some(StatsHolder::new(timeout));
        self
    }
}

impl StatisticsTask {
    fn record(&mut self, outcome: FlushOutcome) {
        match outcome {
            FlushOutcome::Delivered(report) => self.holder.add_delivery(report),
            FlushOutcome::Failed { entries } => self.holder.add_failure(entries),
        }
    }

    fn report(&mut self) {
        match self.holder.calculate_and_reset() {
            Some(summary) => info!("{}", summary),
            None => info!(
                "No logs shipped in the last {} seconds",
                self.timeout.as_secs()
            ),
        }
    }

    async fn run(mut self) {
        //Arm the timer to produce statistics at regular intervals
        let start = tokio::time::Instant::now() + self.timeout.into();
        let mut timer = interval_at(start, self.timeout.into());

        loop {
            select! {
                _ = self.shutdown_token.cancelled() => {
                    while let Ok(Some(outcome)) = self.stats_rx.try_recv() {
                        self.record(outcome);
                    }
                    if let Some(summary) = self.holder.calculate_and_reset() {
                        info!("{}", summary);
                    }
                    info!("Shutting down statistics task");
                    break
                }
                _ = timer.tick() => self.report(),
                outcome = self.stats_rx.recv() => {
                    match outcome {
                        Ok(outcome) => self.record(outcome),
                        Err(_) => {
                            info!("Statistics channel closed");
                            break
                        }
                    }
                }
            }
        }
    }
}

impl IntoFuture for StatisticsTask {
    type Output = ();
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}

#[cfg(test)]
mod statistics_tests {
    use coarsetime::{Duration, Instant};

    use crate::statistics::*;

    #[test]
    fn test_stats_holder() {
        let mut stats: Box<dyn Stats> = Box::new(StatsHolder::default());
        let reference = Instant::now();

        stats.add_failure(4);

        stats.add_delivery(DeliveryReport::new(
            reference,
            reference + Duration::new(2, 0),
            10,
            128,
        ));
        stats.add_delivery(DeliveryReport::new(
            reference + Duration::new(3, 0),
            reference + Duration::new(4, 0),
            5,
            128,
        ));
        stats.add_delivery(DeliveryReport::new(
            reference + Duration::new(4, 0),
            reference + Duration::new(10, 0),
            1,
            256,
        ));

        let stats_oracle = StatSummary {
            throughput: 512. / 10.,
            min_latency: Duration::new(1, 0),
            max_latency: Duration::new(6, 0),
            average_latency: Duration::new(3, 0),
            delivered_batches: 3,
            delivered_entries: 16,
            failed_batches: 1,
            failed_entries: 4,
        };

        let summary = stats.calculate_and_reset();
        assert_eq!(summary, Some(stats_oracle));
        assert_eq!(stats.calculate(), None);
    }

    #[test]
    fn test_failures_only() {
        let mut stats = StatsHolder::default();
        stats.add_failure(2);

        let summary = stats.calculate().unwrap();
        assert_eq!(summary.delivered_batches, 0);
        assert_eq!(summary.average_latency, Duration::new(0, 0));
        println!("{}", summary);
    }
}
