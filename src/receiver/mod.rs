use std::sync::Arc;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use serde_json::{Map, Value};

use crate::{AppendFields, LogEntry, forwarder::LogForwarder, sender::LogSink};

/// Targets never mirrored: the forwarder itself and the HTTP stack it uses.
/// Mirroring them would make every flush produce new entries.
pub const DEFAULT_IGNORED_TARGETS: [&str; 7] = [
    env!("CARGO_CRATE_NAME"),
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "tower",
    "rustls",
];

/// [`Log`] implementation printing through an inner logger and mirroring
/// every record to a [`LogForwarder`]
pub struct MirrorLogger<S: LogSink, A: AppendFields> {
    inner: Box<dyn Log>,
    forwarder: Arc<LogForwarder<S, A>>,
    ignored_targets: Vec<String>,
}

impl<S: LogSink, A: AppendFields> MirrorLogger<S, A> {
    pub fn new(inner: Box<dyn Log>, forwarder: Arc<LogForwarder<S, A>>) -> Self {
        Self {
            inner,
            forwarder,
            ignored_targets: DEFAULT_IGNORED_TARGETS.map(String::from).to_vec(),
        }
    }

    pub fn ignore_target(mut self, target: impl Into<String>) -> Self {
        self.ignored_targets.push(target.into());
        self
    }

    /// Register as the global logger
    pub fn install(self, level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }

    fn is_ignored(&self, target: &str) -> bool {
        self.ignored_targets.iter().any(|ignored| {
            target == ignored.as_str()
                || target
                    .strip_prefix(ignored.as_str())
                    .is_some_and(|rest| rest.starts_with("::"))
        })
    }
}

impl<S: LogSink, A: AppendFields> Log for MirrorLogger<S, A> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.inner.log(record);

        if !self.is_ignored(record.target()) {
            self.forwarder.write(entry_from_record(record));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn entry_from_record(record: &Record) -> LogEntry {
    let mut data = Map::new();
    data.insert("target".to_owned(), Value::from(record.target()));
    if let Some(file) = record.file() {
        data.insert("file".to_owned(), Value::from(file));
    }
    if let Some(line) = record.line() {
        data.insert("line".to_owned(), Value::from(line));
    }

    let entry = LogEntry::new(
        record.level().as_str().to_lowercase(),
        record.args().to_string(),
    )
    .with_data(data);

    match record.module_path() {
        Some(module) => entry.with_module(module),
        None => entry,
    }
}
