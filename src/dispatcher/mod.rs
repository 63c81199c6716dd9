use std::{
    future::{Future, IntoFuture},
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use derive_builder::Builder;
use log::{debug, info};
use tokio::{
    select,
    time::{MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

use crate::{AppendFields, forwarder::Shared, sender::LogSink};

/// Flushes the forwarder buffer every `period`, whatever its content
#[derive(Builder)]
#[builder(pattern = "owned")]
pub(crate) struct FlushTimerTask<S, A>
where
    S: LogSink,
    A: AppendFields,
{
    shutdown_token: CancellationToken,
    shared: Arc<Shared<S, A>>,
    period: Duration,
}

impl<S, A> FlushTimerTask<S, A>
where
    S: LogSink,
    A: AppendFields,
{
    async fn run(self) {
        let start = tokio::time::Instant::now() + self.period;
        let mut timer = interval_at(start, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = self.shutdown_token.cancelled() => {
                    info!("Shutting down flush timer task");
                    break;
                }

                _ = timer.tick() => {
                    debug!("Periodic flush");
                    self.shared.flush().await;
                }
            }
        }
    }
}

impl<S, A> IntoFuture for FlushTimerTask<S, A>
where
    S: LogSink,
    A: AppendFields,
{
    type Output = ();
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}
