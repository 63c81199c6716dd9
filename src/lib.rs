#![doc = include_str!("../README.md")]
use statistics::DeliveryReport;

pub use config::ClsEnvVars;
pub use config::ForwarderSlot;
pub use entry::LogEntry;
pub use receiver::MirrorLogger;
pub use sender::HttpLogSender;
pub use sender::LogSink;
pub use strategies::AppendFields;
pub use strategies::AppendFieldsStrategies;

mod buffer;
mod config;
mod dispatcher;
mod entry;
mod receiver;
mod statistics;
mod strategies;

/// Wire representation and delivery of log groups
pub mod sender;

/// Main library module
pub mod forwarder;

pub(crate) enum FlushOutcome {
    Delivered(DeliveryReport),
    Failed { entries: usize },
}
